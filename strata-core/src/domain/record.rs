//! Ledger record model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A migration recorded as applied in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
    /// Wall-clock time spent executing the migration; 0 for resolved
    /// (baselined) and adopted migrations
    pub execution_ms: i64,
}

impl MigrationRecord {
    pub fn new(id: impl Into<String>, checksum: impl Into<String>, execution_ms: i64) -> Self {
        Self {
            id: id.into(),
            checksum: checksum.into(),
            applied_at: Utc::now(),
            execution_ms,
        }
    }
}

/// Parse a timestamp written by the ledger.
///
/// The ledger stores RFC 3339 text; anything unreadable falls back to the
/// Unix epoch rather than failing the whole ledger read.
pub fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}
