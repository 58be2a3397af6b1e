//! Rotation orchestrator
//!
//! Each cycle observes three things: the slot document (active label and both
//! slots), the deployed config file, and the admin credential. From those it
//! picks one reconciliation branch, drives it to completion, and exits.
//!
//! # Branches
//!
//! | Config matches | Active | Branch | Effect |
//! |---|---|---|---|
//! | neither slot | any | [`Branch::Bootstrap`] | provision `A` and `B` as new accounts |
//! | standby only | any | [`Branch::DriftForward`] | flip pointer, age old active |
//! | active | `B` | [`Branch::ResumeAging`] | age standby |
//! | active | `A` | [`Branch::FullRotation`] | guarded cutover to standby, age old active |
//!
//! Every branch except bootstrap ends with an admin password rotation in live
//! mode. An interrupted cycle always leaves a state that one of these
//! branches recognises, so the next invocation finishes the work.
//!
//! # Cutover and rollback
//!
//! The config write, mirror update, restart, post-cutover validation and the
//! pointer persist run as one unit. The pre-cutover config bytes and the slot
//! the workload ran on are captured first; on any failure they are restored,
//! the workload is restarted onto them and validated, and the original error
//! is returned.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::cluster::{ClusterRefresher, WorkloadTarget};
use crate::config::RotationConfig;
use crate::database::Database;
use crate::error::{ConfigError, RotationError, RotationResult, RuntimeConfigError};
use crate::password::{DEFAULT_PASSWORD_LENGTH, generate_password};
use crate::runtime_config::{self, RuntimeConfigSnapshot};
use crate::slots::{AdminCredential, Slot, SlotLabel, SlotSecretState, managed_username};
use crate::store::{SecretBackend, SlotStore};
use crate::validators::{HealthProbe, validate_connection};

/// Whether mutating operations run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Apply every change
    Live,
    /// Read, decide and validate; write nothing
    DryRun,
}

impl RunMode {
    /// Mode for a `--dry-run` flag value
    pub fn from_dry_run(dry_run: bool) -> Self {
        if dry_run { Self::DryRun } else { Self::Live }
    }

    /// Whether this is a dry run
    pub fn is_dry_run(self) -> bool {
        self == Self::DryRun
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Live => "live",
            Self::DryRun => "dry-run",
        })
    }
}

/// Reconciliation branch chosen for a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    /// Config matches neither slot; create managed accounts
    Bootstrap,
    /// Config already points at the standby slot
    DriftForward,
    /// Pointer caught up; the standby password still needs aging
    ResumeAging,
    /// Steady state; cut over to the standby slot
    FullRotation,
}

impl Branch {
    /// Pick the branch for the observed state
    pub fn classify(
        active: SlotLabel,
        matches_active: bool,
        matches_standby: bool,
    ) -> Self {
        match (matches_active, matches_standby) {
            (false, false) => Self::Bootstrap,
            (false, true) => Self::DriftForward,
            (true, _) if active == SlotLabel::B => Self::ResumeAging,
            (true, _) => Self::FullRotation,
        }
    }

    /// Stable name used in reports
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap",
            Self::DriftForward => "drift_forward",
            Self::ResumeAging => "resume_aging",
            Self::FullRotation => "full_rotation",
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one rotation cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RotationOutcome {
    /// Branch that ran
    pub branch: Branch,
    /// Whether mutations were suppressed
    pub dry_run: bool,
    /// Label fronting traffic when the cycle ended
    pub active: SlotLabel,
}

/// State restored if the cutover fails
struct CutoverCheckpoint {
    config_path: PathBuf,
    original_content: String,
    restore_slot: Slot,
}

/// Drives rotation cycles against the configured backends
pub struct RotationOrchestrator {
    config: RotationConfig,
    workload: WorkloadTarget,
    store: SlotStore,
    cluster: Arc<dyn ClusterRefresher>,
    db: Arc<dyn Database>,
    health: Option<HealthProbe>,
}

impl fmt::Debug for RotationOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotationOrchestrator")
            .field("config", &self.config)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

impl RotationOrchestrator {
    /// Validate `config` and wire the backends
    pub fn new(
        config: RotationConfig,
        secrets: Arc<dyn SecretBackend>,
        cluster: Arc<dyn ClusterRefresher>,
        db: Arc<dyn Database>,
    ) -> RotationResult<Self> {
        config.validate()?;
        let health = config
            .health_url
            .clone()
            .map(|url| HealthProbe::new(url, config.health_timeout))
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                field: "health_url".into(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            workload: config.workload(),
            config,
            store: SlotStore::new(secrets),
            cluster,
            db,
            health,
        })
    }

    /// Configuration in effect
    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Run one reconciliation cycle
    #[tracing::instrument(skip(self))]
    pub async fn rotate(&self, mode: RunMode) -> RotationResult<RotationOutcome> {
        let config_path = runtime_config::discover(&self.config.sites_root)?;
        let snapshot = runtime_config::parse(&runtime_config::read(&config_path)?);

        let mut state = self.store.get_slots(&self.config.slots_secret_id).await?;
        let active = state.active();
        let standby = active.other();
        let fallback_host = admin_fallback_host(&state, snapshot.host.as_deref());

        let admin = match mode {
            RunMode::Live => Some(self.load_admin(&state, &fallback_host).await?),
            RunMode::DryRun => None,
        };

        let defaulted = self.fill_defaults(mode, &mut state, &snapshot).await?;

        let active_slot = state.slot(active)?;
        let standby_slot = state.slot(standby)?;
        let matches_active = snapshot.matches(&active_slot);
        let matches_standby = snapshot.matches(&standby_slot);
        let branch = Branch::classify(active, matches_active, matches_standby);

        tracing::info!(
            %branch,
            %active,
            %standby,
            matches_active,
            matches_standby,
            "Reconciliation branch selected"
        );

        let final_active = match branch {
            Branch::Bootstrap => {
                self.bootstrap(mode, admin.as_ref(), &mut state, &snapshot)
                    .await?;
                return Ok(RotationOutcome {
                    branch,
                    dry_run: mode.is_dry_run(),
                    active,
                });
            }
            Branch::DriftForward => {
                state.set_active(standby);
                if mode.is_dry_run() {
                    tracing::info!(%standby, "Dry run: not persisting pointer flip");
                } else {
                    self.store.put_slots(&state).await?;
                }
                self.age_slot(mode, admin.as_ref(), standby, active).await?;
                standby
            }
            Branch::ResumeAging => {
                self.age_slot(mode, admin.as_ref(), active, standby).await?;
                active
            }
            Branch::FullRotation => {
                let skip_validation = mode.is_dry_run() && defaulted;
                let cut_over = self
                    .cutover(
                        mode,
                        admin.as_ref(),
                        &mut state,
                        &config_path,
                        active_slot,
                        skip_validation,
                    )
                    .await?;
                if !cut_over {
                    return Ok(RotationOutcome {
                        branch,
                        dry_run: true,
                        active,
                    });
                }
                self.age_slot(mode, admin.as_ref(), standby, active).await?;
                standby
            }
        };

        if let (RunMode::Live, Some(admin)) = (mode, admin.as_ref()) {
            self.rotate_admin(admin, &fallback_host).await?;
        }

        tracing::info!(%branch, active = %final_active, "Rotation cycle complete");
        Ok(RotationOutcome {
            branch,
            dry_run: mode.is_dry_run(),
            active: if mode.is_dry_run() { active } else { final_active },
        })
    }

    /// Re-provision both slot accounts from the stored passwords
    ///
    /// Does not move the pointer, touch the config file, or restart anything.
    #[tracing::instrument(skip(self))]
    pub async fn sync_db_users(&self, mode: RunMode) -> RotationResult<()> {
        let mut state = self.store.get_slots(&self.config.slots_secret_id).await?;
        let fallback_host = admin_fallback_host(&state, None);

        let admin = match mode {
            RunMode::Live => Some(self.load_admin(&state, &fallback_host).await?),
            RunMode::DryRun => None,
        };

        self.fill_defaults(mode, &mut state, &RuntimeConfigSnapshot::default())
            .await?;

        for label in SlotLabel::ALL {
            let slot = state.slot(label)?;
            self.provision(mode, admin.as_ref(), &slot).await?;
            tracing::info!(slot = %label, username = %slot.username, "Slot account in sync");
        }
        Ok(())
    }

    async fn fill_defaults(
        &self,
        mode: RunMode,
        state: &mut SlotSecretState,
        snapshot: &RuntimeConfigSnapshot,
    ) -> RotationResult<bool> {
        let defaulted = state.ensure_defaults(
            &self.config.app_user_prefix,
            snapshot.host.as_deref(),
            snapshot.dbname.as_deref(),
        );
        if defaulted {
            if mode.is_dry_run() {
                tracing::info!("Dry run: not persisting filled slot defaults");
            } else {
                tracing::info!("Persisting filled slot defaults");
                self.store.put_slots(state).await?;
            }
        }
        Ok(defaulted)
    }

    async fn bootstrap(
        &self,
        mode: RunMode,
        admin: Option<&AdminCredential>,
        state: &mut SlotSecretState,
        snapshot: &RuntimeConfigSnapshot,
    ) -> RotationResult<()> {
        let host = snapshot
            .host
            .clone()
            .ok_or(RuntimeConfigError::FieldNotFound { field: "host" })?;
        let dbname = snapshot
            .dbname
            .clone()
            .ok_or(RuntimeConfigError::FieldNotFound { field: "dbase" })?;
        let port = snapshot.port_or_default().to_owned();

        tracing::info!(%host, %dbname, "Bootstrapping managed slot accounts");
        for label in SlotLabel::ALL {
            let slot = Slot {
                username: managed_username(&self.config.app_user_prefix, label),
                password: generate_password(DEFAULT_PASSWORD_LENGTH),
                host: host.clone(),
                port: port.clone(),
                dbname: dbname.clone(),
            };
            self.provision(mode, admin, &slot).await?;
            state.set_slot(label, &slot);
        }

        if mode.is_dry_run() {
            tracing::info!("Dry run: not persisting bootstrapped slots");
        } else {
            self.store.put_slots(state).await?;
        }
        Ok(())
    }

    /// Cut over to the standby slot; `Ok(false)` when a dry run stops short
    async fn cutover(
        &self,
        mode: RunMode,
        admin: Option<&AdminCredential>,
        state: &mut SlotSecretState,
        config_path: &Path,
        restore_slot: Slot,
        skip_validation: bool,
    ) -> RotationResult<bool> {
        let target = state.standby();
        let target_slot = state.slot(target)?;

        self.provision(mode, admin, &target_slot).await?;
        if mode.is_dry_run() {
            if skip_validation {
                tracing::info!(
                    slot = %target,
                    "Dry run: standby was just defaulted, skipping validation"
                );
            } else {
                validate_connection(self.db.as_ref(), &target_slot).await?;
            }
        }

        let original_content = runtime_config::read(config_path)?;
        let rendered = runtime_config::render(&original_content, &target_slot)?;

        if mode.is_dry_run() {
            tracing::info!(slot = %target, "Dry run: stopping before cutover");
            return Ok(false);
        }

        let checkpoint = CutoverCheckpoint {
            config_path: config_path.to_owned(),
            original_content,
            restore_slot,
        };

        let applied = self
            .apply_cutover(state, target, &target_slot, &checkpoint.config_path, &rendered)
            .await;
        match applied {
            Ok(()) => {
                tracing::info!(active = %target, "Cutover complete");
                Ok(true)
            }
            Err(error) => {
                tracing::error!(%error, "Cutover failed; rolling back");
                match self.compensate(&checkpoint).await {
                    Ok(()) => {
                        tracing::warn!("Rollback restored the previous credential");
                        Err(error)
                    }
                    Err(rollback) => {
                        tracing::error!(error = %rollback, "Rollback failed");
                        Err(RotationError::RollbackFailed {
                            original: Box::new(error),
                            rollback: Box::new(rollback),
                        })
                    }
                }
            }
        }
    }

    async fn apply_cutover(
        &self,
        state: &mut SlotSecretState,
        target: SlotLabel,
        target_slot: &Slot,
        config_path: &Path,
        rendered: &str,
    ) -> RotationResult<()> {
        runtime_config::atomic_write(config_path, rendered, self.config.file_owner)?;
        self.cluster
            .update_mirror(&self.workload, target_slot)
            .await?;
        self.cluster
            .restart_and_wait(&self.workload, self.config.rollout_timeout)
            .await?;
        self.validate_runtime(target_slot).await?;

        state.set_active(target);
        self.store.put_slots(state).await?;
        Ok(())
    }

    async fn compensate(&self, checkpoint: &CutoverCheckpoint) -> RotationResult<()> {
        runtime_config::atomic_write(
            &checkpoint.config_path,
            &checkpoint.original_content,
            self.config.file_owner,
        )?;
        self.cluster
            .update_mirror(&self.workload, &checkpoint.restore_slot)
            .await?;
        self.cluster
            .restart_and_wait(&self.workload, self.config.rollout_timeout)
            .await?;
        self.validate_runtime(&checkpoint.restore_slot).await
    }

    async fn validate_runtime(&self, slot: &Slot) -> RotationResult<()> {
        validate_connection(self.db.as_ref(), slot).await?;
        if let Some(probe) = &self.health {
            probe.probe().await;
        }
        Ok(())
    }

    /// Give `old` a fresh password so an idle slot never holds a once-live secret
    #[tracing::instrument(skip(self, admin))]
    async fn age_slot(
        &self,
        mode: RunMode,
        admin: Option<&AdminCredential>,
        new_active: SlotLabel,
        old: SlotLabel,
    ) -> RotationResult<()> {
        let mut state = self.store.get_slots(&self.config.slots_secret_id).await?;
        state.ensure_defaults(&self.config.app_user_prefix, None, None);

        let mut aged = state.slot(old)?;
        aged.password = generate_password(DEFAULT_PASSWORD_LENGTH);
        self.provision(mode, admin, &aged).await?;

        if mode.is_dry_run() {
            tracing::info!("Dry run: not persisting aged slot");
            return Ok(());
        }

        state.set_slot(old, &aged);
        state.set_active(new_active);
        self.store.put_slots(&state).await?;
        tracing::info!(username = %aged.username, "Aged slot password");
        Ok(())
    }

    /// Create-or-alter `slot`'s account and prove it, in live mode only
    async fn provision(
        &self,
        mode: RunMode,
        admin: Option<&AdminCredential>,
        slot: &Slot,
    ) -> RotationResult<()> {
        let (RunMode::Live, Some(admin)) = (mode, admin) else {
            tracing::info!(username = %slot.username, "Dry run: skipping account provisioning");
            return Ok(());
        };
        self.db.upsert_app_user(admin, slot).await?;
        validate_connection(self.db.as_ref(), slot).await?;
        Ok(())
    }

    /// Load the admin credential, recovering its password from a slot if needed
    #[tracing::instrument(skip(self, state))]
    async fn load_admin(
        &self,
        state: &SlotSecretState,
        fallback_host: &str,
    ) -> RotationResult<AdminCredential> {
        let mut admin = self.store.get_admin(&self.config.admin_secret_id).await?;
        let host = admin.endpoint_host(fallback_host).to_owned();

        match self
            .db
            .check_login(&host, admin.port, &admin.username, &admin.password)
            .await
        {
            Ok(()) => return Ok(admin),
            Err(e) if e.is_rejected_login() => {
                tracing::warn!(username = %admin.username, error = %e, "Stored admin password rejected");
            }
            Err(e) => return Err(e.into()),
        }

        for label in SlotLabel::ALL {
            let record = state.record(label);
            if record.username.as_deref() != Some(admin.username.as_str()) {
                continue;
            }
            let Some(candidate) = &record.password else {
                continue;
            };
            if self
                .db
                .check_login(&host, admin.port, &admin.username, candidate)
                .await
                .is_ok()
            {
                tracing::warn!(slot = %label, "Recovered admin password from slot");
                admin.password = candidate.clone();
                self.store
                    .put_admin(&self.config.admin_secret_id, &admin)
                    .await?;
                return Ok(admin);
            }
        }

        Err(RotationError::AdminRecoveryExhausted {
            username: admin.username,
        })
    }

    /// Alter, verify, then persist a new admin password
    #[tracing::instrument(skip(self, admin), fields(username = %admin.username))]
    async fn rotate_admin(&self, admin: &AdminCredential, fallback_host: &str) -> RotationResult<()> {
        let host = admin.endpoint_host(fallback_host).to_owned();
        let new_password = generate_password(DEFAULT_PASSWORD_LENGTH);

        self.db
            .alter_admin_password(admin, &host, &new_password)
            .await?;
        self.db
            .check_login(&host, admin.port, &admin.username, &new_password)
            .await?;

        let mut updated = admin.clone();
        updated.password = new_password;
        self.store
            .put_admin(&self.config.admin_secret_id, &updated)
            .await?;
        tracing::info!("Admin password rotated");
        Ok(())
    }
}

/// Host for admin connections when the admin document names none
fn admin_fallback_host(state: &SlotSecretState, config_host: Option<&str>) -> String {
    state
        .record(state.active())
        .host
        .as_deref()
        .or(config_host)
        .or(state.record(state.standby()).host.as_deref())
        .unwrap_or_default()
        .to_owned()
}
