//! Dualslot Rotation
//!
//! Zero-downtime database credential rotation for a stateful workload running
//! on Kubernetes, built around two credential slots (`A` and `B`) and an
//! `active_slot` pointer held in a secret store.
//!
//! # Features
//!
//! - **Dual-slot cutover** - the standby slot is provisioned and validated
//!   before traffic moves to it
//! - **Guarded rollback** - a failed cutover restores the live config file,
//!   the cluster credential mirror and the rollout
//! - **Resumable cycles** - every interruption point is recognised and
//!   finished by the next invocation
//! - **Admin self-healing** - the privileged credential survives a lost
//!   secret write
//! - **Dry-run mode** - every decision executes, no mutation does
//!
//! # Backends
//!
//! The orchestrator talks to the outside world through three seams, each
//! with a production backend behind a cargo feature and an in-memory fake in
//! [`testing`]:
//!
//! | Seam | Trait | Backend | Feature |
//! |---|---|---|---|
//! | Secret store | [`store::SecretBackend`] | AWS Secrets Manager | `aws` |
//! | Cluster | [`cluster::ClusterRefresher`] | Kubernetes | `kubernetes` |
//! | Database | [`database::Database`] | MySQL | `mysql` |
#![forbid(unsafe_code)]

/// Runtime inputs and their validation
pub mod config;
/// Cluster credential mirror and rolling restarts
pub mod cluster;
/// Database provisioning and connectivity
pub mod database;
pub mod error;
/// Rotation state machine
pub mod orchestrator;
pub mod password;
/// Live database-connection config file editing
pub mod runtime_config;
pub mod secret;
/// Slot, slot document and admin credential types
pub mod slots;
/// Slot and admin document persistence
pub mod store;
pub mod testing;
/// Connection validation and health probing
pub mod validators;

// ── Root re-exports ─────────────────────────────────────────────────────────

pub use crate::config::RotationConfig;
pub use crate::error::{
    ClusterError, ConfigError, DatabaseError, RotationError, RotationResult, RuntimeConfigError,
    StoreError, ValidationError,
};
pub use crate::orchestrator::{Branch, RotationOrchestrator, RotationOutcome, RunMode};
pub use crate::password::generate_password;
pub use crate::secret::SecretString;
pub use crate::slots::{AdminCredential, Slot, SlotLabel, SlotRecord, SlotSecretState, standby};

/// Commonly used types and traits
pub mod prelude {
    pub use crate::cluster::{ClusterRefresher, WorkloadTarget};
    pub use crate::database::Database;
    pub use crate::error::{RotationError, RotationResult};
    pub use crate::orchestrator::{RotationOrchestrator, RotationOutcome, RunMode};
    pub use crate::slots::{AdminCredential, Slot, SlotLabel, SlotSecretState};
    pub use crate::store::{SecretBackend, SlotStore};
    pub use crate::validators::HealthProbe;
    pub use crate::{RotationConfig, SecretString};
}
