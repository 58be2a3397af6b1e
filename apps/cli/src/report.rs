//! Run status reporting
//!
//! JSON status lines go to stdout; human messages go to stdout on success and
//! stderr on failure. Logs never share stdout.

use std::path::PathBuf;

use dualslot_rotation::{RotationOutcome, RunMode};
use serde_json::{Value, json};

/// What a successful invocation did
#[derive(Debug)]
pub enum Summary {
    /// One rotation cycle ran
    Rotated(RotationOutcome),
    /// Slot accounts were re-provisioned
    Synced(RunMode),
    /// The config file mode was relaxed
    PermissionsFixed(PathBuf),
}

impl Summary {
    /// JSON status line
    pub fn to_json(&self) -> Value {
        match self {
            Self::Rotated(outcome) => json!({
                "status": "ok",
                "dry_run": outcome.dry_run,
                "branch": outcome.branch,
                "active_slot": outcome.active,
            }),
            Self::Synced(mode) => json!({
                "status": "ok",
                "dry_run": mode.is_dry_run(),
                "action": "sync_db_users",
            }),
            Self::PermissionsFixed(path) => json!({
                "status": "ok",
                "action": "fix_permissions",
                "path": path.display().to_string(),
            }),
        }
    }

    /// Human-readable sentence
    pub fn message(&self) -> String {
        match self {
            Self::Rotated(outcome) if outcome.dry_run => format!(
                "Dry run complete: {} branch would run; slot {} is active",
                outcome.branch, outcome.active
            ),
            Self::Rotated(outcome) => format!(
                "Rotation complete ({}); slot {} is active",
                outcome.branch, outcome.active
            ),
            Self::Synced(mode) if mode.is_dry_run() => {
                "Dry run complete: slot accounts would be re-provisioned".to_owned()
            }
            Self::Synced(_) => "Slot accounts re-provisioned".to_owned(),
            Self::PermissionsFixed(path) => {
                format!("Set mode 0644 on {}", path.display())
            }
        }
    }
}

/// JSON status line for a failure
pub fn error_json(error: &anyhow::Error) -> Value {
    json!({
        "status": "error",
        "error": format!("{error:#}"),
    })
}
