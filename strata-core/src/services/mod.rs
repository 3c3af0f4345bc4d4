//! Service layer - migration orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on a specific use case or feature area.

pub mod authoring;
mod doctor;
pub mod drift;
pub mod ledger;
pub mod logging;
pub mod migration;
pub mod plan;

pub use authoring::{AuthoringService, CreatedMigration};
pub use doctor::{CheckResult, DoctorResult, DoctorService, DoctorSummary};
pub use drift::{DriftReport, DriftService};
pub use ledger::Ledger;
pub use logging::{EntryPoint, LogStats, LoggingService, RunEvent, RunEventEntry};
pub use migration::{
    AppliedMigration, ApplyReport, MigrationOptions, MigrationService, RollbackReport,
};
pub use plan::{build_plan, MigrationPlan, MigrationState, MigrationStatus};
