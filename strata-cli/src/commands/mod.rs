//! CLI command implementations

pub mod doctor;
pub mod down;
pub mod drift;
pub mod explain;
pub mod init;
pub mod logs;
pub mod new;
pub mod resolve;
pub mod status;
pub mod up;

use std::path::Path;

use anyhow::{Context, Result};
use strata_core::config::CONFIG_FILE;
use strata_core::{EntryPoint, StrataContext};

/// Open the project in `dir`
///
/// A missing strata.json is not an error: defaults apply, which lets
/// `strata status` work in any directory with a `migrations/` folder.
pub fn get_context(dir: &Path) -> Result<StrataContext> {
    if !dir.join(CONFIG_FILE).exists() {
        log::info!(
            "No {} in {}, using defaults",
            CONFIG_FILE,
            dir.display()
        );
    }

    StrataContext::new(dir, EntryPoint::Cli)
        .with_context(|| format!("Failed to open strata project in {}", dir.display()))
}
