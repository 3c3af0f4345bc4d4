//! Migration planning - reconciles a migration source with the ledger

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{Migration, MigrationError, MigrationRecord, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Applied,
    Pending,
    /// Pending but older than the newest applied migration
    OutOfOrder,
    /// Applied, but the source SQL no longer matches the recorded checksum
    Modified,
    /// Applied, but gone from the source
    Missing,
}

impl MigrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Pending => "pending",
            Self::OutOfOrder => "out_of_order",
            Self::Modified => "modified",
            Self::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub id: String,
    pub state: MigrationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_ms: Option<i64>,
    pub reversible: bool,
}

/// Source and ledger side by side
#[derive(Debug, Clone, Serialize)]
pub struct MigrationPlan {
    /// Every known migration, ordered by id
    pub statuses: Vec<MigrationStatus>,
    /// Migrations not yet applied, ordered by id
    #[serde(skip)]
    pub pending: Vec<Migration>,
    #[serde(skip)]
    applied: Vec<MigrationRecord>,
}

impl MigrationPlan {
    pub fn applied(&self) -> &[MigrationRecord] {
        &self.applied
    }

    pub fn last_applied(&self) -> Option<&MigrationRecord> {
        self.applied.last()
    }

    pub fn pending_ids(&self) -> Vec<&str> {
        self.pending.iter().map(|m| m.id.as_str()).collect()
    }

    pub fn count(&self, state: MigrationState) -> usize {
        self.statuses.iter().filter(|s| s.state == state).count()
    }

    pub fn is_consistent(&self) -> bool {
        self.statuses.iter().all(|s| {
            matches!(s.state, MigrationState::Applied | MigrationState::Pending)
        })
    }

    /// First inconsistency as an error: modified, missing, then out-of-order
    pub fn check(&self, available: &[Migration]) -> Result<()> {
        let by_id: HashMap<&str, &Migration> =
            available.iter().map(|m| (m.id.as_str(), m)).collect();

        for record in &self.applied {
            match by_id.get(record.id.as_str()) {
                Some(m) if m.checksum != record.checksum => {
                    return Err(MigrationError::ChecksumMismatch {
                        id: record.id.clone(),
                        recorded: record.checksum.clone(),
                        current: m.checksum.clone(),
                    })
                }
                Some(_) => {}
                None => return Err(MigrationError::MissingMigration(record.id.clone())),
            }
        }

        if let Some(status) = self
            .statuses
            .iter()
            .find(|s| s.state == MigrationState::OutOfOrder)
        {
            return Err(MigrationError::OutOfOrder {
                id: status.id.clone(),
                last_applied: self
                    .last_applied()
                    .map(|r| r.id.clone())
                    .unwrap_or_default(),
            });
        }

        Ok(())
    }
}

/// Reconcile `available` (sorted by id) with the `applied` ledger records
pub fn build_plan(available: &[Migration], applied: &[MigrationRecord]) -> MigrationPlan {
    let mut applied = applied.to_vec();
    applied.sort_by(|a, b| a.id.cmp(&b.id));

    let recorded: HashMap<&str, &MigrationRecord> =
        applied.iter().map(|r| (r.id.as_str(), r)).collect();
    let last_applied = applied.last().map(|r| r.id.clone());

    let mut statuses = Vec::new();
    let mut pending = Vec::new();

    for migration in available {
        match recorded.get(migration.id.as_str()) {
            Some(record) => statuses.push(MigrationStatus {
                id: migration.id.clone(),
                state: if record.checksum == migration.checksum {
                    MigrationState::Applied
                } else {
                    MigrationState::Modified
                },
                applied_at: Some(record.applied_at),
                execution_ms: Some(record.execution_ms),
                reversible: migration.is_reversible(),
            }),
            None => {
                let out_of_order = last_applied
                    .as_deref()
                    .is_some_and(|last| migration.id.as_str() < last);
                statuses.push(MigrationStatus {
                    id: migration.id.clone(),
                    state: if out_of_order {
                        MigrationState::OutOfOrder
                    } else {
                        MigrationState::Pending
                    },
                    applied_at: None,
                    execution_ms: None,
                    reversible: migration.is_reversible(),
                });
                pending.push(migration.clone());
            }
        }
    }

    for record in &applied {
        if !available.iter().any(|m| m.id == record.id) {
            statuses.push(MigrationStatus {
                id: record.id.clone(),
                state: MigrationState::Missing,
                applied_at: Some(record.applied_at),
                execution_ms: Some(record.execution_ms),
                reversible: false,
            });
        }
    }
    statuses.sort_by(|a, b| a.id.cmp(&b.id));

    MigrationPlan {
        statuses,
        pending,
        applied,
    }
}
