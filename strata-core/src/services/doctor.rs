//! Doctor service - migration health checks

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;

use crate::adapters::{DuckDbTarget, RunLock};
use crate::domain::{MigrationError, Result};
use crate::services::drift::DriftService;
use crate::services::migration::MigrationService;
use crate::services::plan::MigrationState;

/// Doctor service for health checks
pub struct DoctorService {
    target: Arc<DuckDbTarget>,
    migrations: Arc<MigrationService>,
    drift: Arc<DriftService>,
}

impl DoctorService {
    pub fn new(
        target: Arc<DuckDbTarget>,
        migrations: Arc<MigrationService>,
        drift: Arc<DriftService>,
    ) -> Self {
        Self {
            target,
            migrations,
            drift,
        }
    }

    /// Run all health checks
    pub fn run_checks(&self) -> Result<DoctorResult> {
        let mut checks = BTreeMap::new();
        let plan = self.migrations.status()?;

        // Applied migrations whose source changed or disappeared
        let broken: Vec<serde_json::Value> = plan
            .statuses
            .iter()
            .filter(|s| matches!(s.state, MigrationState::Modified | MigrationState::Missing))
            .map(|s| json!({"migration": s.id, "state": s.state.as_str()}))
            .collect();
        checks.insert(
            "ledger_integrity".to_string(),
            CheckResult {
                status: if broken.is_empty() { "pass" } else { "error" }.to_string(),
                message: if broken.is_empty() {
                    format!("{} applied migration(s) match their source", plan.applied().len())
                } else {
                    format!(
                        "{} applied migration(s) were edited or removed",
                        broken.len()
                    )
                },
                details: if broken.is_empty() { None } else { Some(broken) },
            },
        );

        let out_of_order: Vec<serde_json::Value> = plan
            .statuses
            .iter()
            .filter(|s| s.state == MigrationState::OutOfOrder)
            .map(|s| json!({"migration": s.id}))
            .collect();
        checks.insert(
            "ordering".to_string(),
            CheckResult {
                status: if out_of_order.is_empty() { "pass" } else { "error" }.to_string(),
                message: if out_of_order.is_empty() {
                    "Pending migrations are newer than the last applied one".to_string()
                } else {
                    format!(
                        "{} pending migration(s) are older than {}",
                        out_of_order.len(),
                        plan.last_applied().map(|r| r.id.as_str()).unwrap_or("-")
                    )
                },
                details: if out_of_order.is_empty() {
                    None
                } else {
                    Some(out_of_order)
                },
            },
        );

        let pending = plan.count(MigrationState::Pending);
        checks.insert(
            "pending_migrations".to_string(),
            CheckResult {
                status: if pending == 0 { "pass" } else { "warning" }.to_string(),
                message: if pending == 0 {
                    "Database is up to date".to_string()
                } else {
                    format!("{} migration(s) waiting to be applied", pending)
                },
                details: if pending == 0 {
                    None
                } else {
                    Some(plan.pending_ids().iter().map(|id| json!({"migration": id})).collect())
                },
            },
        );

        // Replaying needs every applied migration's SQL
        let drift_check = match self.drift.check() {
            Ok(report) if report.is_clean() => CheckResult {
                status: "pass".to_string(),
                message: "Live schema matches applied migrations".to_string(),
                details: None,
            },
            Ok(report) => CheckResult {
                status: "warning".to_string(),
                message: format!("{} difference(s) from applied migrations", report.drift.len()),
                details: Some(
                    report
                        .drift
                        .iter()
                        .map(|d| json!({"drift": d.to_string()}))
                        .collect(),
                ),
            },
            Err(e @ MigrationError::MissingMigration(_)) => CheckResult {
                status: "error".to_string(),
                message: format!("Cannot rebuild expected schema: {}", e),
                details: None,
            },
            Err(e) => return Err(e),
        };
        checks.insert("schema_drift".to_string(), drift_check);

        let irreversible: Vec<serde_json::Value> = plan
            .statuses
            .iter()
            .filter(|s| s.state == MigrationState::Applied && !s.reversible)
            .map(|s| json!({"migration": s.id}))
            .collect();
        checks.insert(
            "rollback_coverage".to_string(),
            CheckResult {
                status: if irreversible.is_empty() { "pass" } else { "warning" }.to_string(),
                message: if irreversible.is_empty() {
                    "Every applied migration has down SQL".to_string()
                } else {
                    format!("{} applied migration(s) cannot be rolled back", irreversible.len())
                },
                details: if irreversible.is_empty() {
                    None
                } else {
                    Some(irreversible)
                },
            },
        );

        if let Some(lock_path) = self.target.lock_path() {
            let check = match RunLock::acquire(&lock_path, Duration::ZERO) {
                Ok(_) => CheckResult {
                    status: "pass".to_string(),
                    message: "No migration run in progress".to_string(),
                    details: None,
                },
                Err(MigrationError::LockTimeout { .. }) => CheckResult {
                    status: "warning".to_string(),
                    message: format!("{} is held by another run", lock_path.display()),
                    details: None,
                },
                Err(e) => return Err(e),
            };
            checks.insert("run_lock".to_string(), check);
        }

        // Calculate summary
        let passed = checks.values().filter(|c| c.status == "pass").count() as i64;
        let warnings = checks.values().filter(|c| c.status == "warning").count() as i64;
        let errors = checks.values().filter(|c| c.status == "error").count() as i64;

        Ok(DoctorResult {
            checks,
            summary: DoctorSummary {
                passed,
                warnings,
                errors,
            },
        })
    }
}

#[derive(Debug, Serialize)]
pub struct DoctorResult {
    pub checks: BTreeMap<String, CheckResult>,
    pub summary: DoctorSummary,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize)]
pub struct DoctorSummary {
    pub passed: i64,
    pub warnings: i64,
    pub errors: i64,
}
