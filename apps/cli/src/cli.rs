//! Command-line arguments

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use dualslot_rotation::RotationConfig;
use dualslot_rotation::runtime_config::FileOwner;
use url::Url;

/// Rotate database credentials between two slots without downtime
#[derive(Parser, Debug)]
#[command(name = "dualslot", version, next_line_help = true)]
pub struct Args {
    /// Read, decide and validate without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Emit JSON logs and a JSON status line
    #[arg(long)]
    pub log_json: bool,

    /// Make the live config file world-readable (0644) and exit
    #[arg(long, conflicts_with = "sync_db_users")]
    pub fix_permissions: bool,

    /// Re-provision both slot accounts without rotating
    #[arg(long)]
    pub sync_db_users: bool,

    /// Secret store region
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Secret holding the slot document
    #[arg(long, env = "RDS_SLOT_SECRET_ID")]
    pub slot_secret_id: Option<String>,

    /// Secret holding the admin credential
    #[arg(long, env = "RDS_ADMIN_SECRET_ID")]
    pub admin_secret_id: Option<String>,

    /// Mounted sites directory containing `default/sqlconf.php`
    #[arg(long, env = "OPENEMR_SITES_MOUNT_ROOT")]
    pub sites_root: Option<PathBuf>,

    /// Namespace of the application workload
    #[arg(long, env = "K8S_NAMESPACE")]
    pub namespace: Option<String>,

    /// Deployment restarted on cutover
    #[arg(long, env = "K8S_DEPLOYMENT_NAME")]
    pub deployment: Option<String>,

    /// Secret mirroring the live credential
    #[arg(long, env = "K8S_SECRET_NAME")]
    pub mirror_secret: Option<String>,

    /// Application health endpoint probed after cutover
    #[arg(long, env = "OPENEMR_HEALTHCHECK_URL")]
    pub health_url: Option<Url>,

    /// Prefix of managed account names
    #[arg(long, env = "ROTATION_APP_USER_PREFIX", default_value = "openemr")]
    pub app_user_prefix: String,

    /// Upper bound on one rollout, in seconds
    #[arg(long, env = "ROTATION_ROLLOUT_TIMEOUT_SECS", default_value_t = 1800)]
    pub rollout_timeout_secs: u64,

    /// Interval between rollout status polls, in seconds
    #[arg(long, env = "ROTATION_ROLLOUT_POLL_SECS", default_value_t = 15)]
    pub rollout_poll_secs: u64,

    /// Upper bound on opening a database connection, in seconds
    #[arg(long, env = "ROTATION_DB_CONNECT_TIMEOUT_SECS", default_value_t = 5)]
    pub db_connect_timeout_secs: u64,

    /// Upper bound on one health probe, in seconds
    #[arg(long, env = "ROTATION_HEALTH_TIMEOUT_SECS", default_value_t = 10)]
    pub health_timeout_secs: u64,

    /// Owner uid applied to the rewritten config file
    #[arg(long, env = "ROTATION_FILE_UID", default_value_t = 1000)]
    pub file_uid: u32,

    /// Owner gid applied to the rewritten config file
    #[arg(long, env = "ROTATION_FILE_GID", default_value_t = 101)]
    pub file_gid: u32,
}

impl Args {
    /// Rotation inputs; absent required values are left empty for
    /// [`RotationConfig::validate`] to report
    pub fn rotation_config(&self) -> RotationConfig {
        RotationConfig {
            region: self.region.clone().unwrap_or_default(),
            slots_secret_id: self.slot_secret_id.clone().unwrap_or_default(),
            admin_secret_id: self.admin_secret_id.clone().unwrap_or_default(),
            sites_root: self.sites_root.clone().unwrap_or_default(),
            namespace: self.namespace.clone().unwrap_or_default(),
            deployment: self.deployment.clone().unwrap_or_default(),
            mirror_secret: self.mirror_secret.clone().unwrap_or_default(),
            health_url: self.health_url.clone(),
            app_user_prefix: self.app_user_prefix.clone(),
            rollout_timeout: Duration::from_secs(self.rollout_timeout_secs),
            rollout_poll_interval: Duration::from_secs(self.rollout_poll_secs),
            connect_timeout: Duration::from_secs(self.db_connect_timeout_secs),
            health_timeout: Duration::from_secs(self.health_timeout_secs),
            file_owner: Some(FileOwner {
                uid: self.file_uid,
                gid: self.file_gid,
            }),
        }
    }
}
