//! Rotation configuration
//!
//! [`RotationConfig`] carries every runtime input. It is filled by the caller
//! (the CLI reads flags and environment) and checked with
//! [`RotationConfig::validate`] before any work begins.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::cluster::WorkloadTarget;
use crate::error::ConfigError;
use crate::runtime_config::FileOwner;

/// Inputs for a rotation cycle
///
/// # Example
///
/// ```rust
/// use dualslot_rotation::RotationConfig;
///
/// let config = RotationConfig {
///     region: "us-west-2".into(),
///     slots_secret_id: "openemr/rds-slots".into(),
///     admin_secret_id: "openemr/rds-admin".into(),
///     sites_root: "/mnt/openemr-sites".into(),
///     namespace: "openemr".into(),
///     deployment: "openemr".into(),
///     mirror_secret: "openemr-db-credentials".into(),
///     ..Default::default()
/// };
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Secret store region
    pub region: String,
    /// Identifier of the slot document
    pub slots_secret_id: String,
    /// Identifier of the admin document
    pub admin_secret_id: String,
    /// Directory holding the `default/sqlconf.php` site tree
    pub sites_root: PathBuf,
    /// Namespace of the workload and its credential mirror
    pub namespace: String,
    /// Deployment restarted on cutover
    pub deployment: String,
    /// Secret mirroring the live credential
    pub mirror_secret: String,
    /// Optional application health endpoint
    pub health_url: Option<Url>,
    /// Prefix of managed application account names
    pub app_user_prefix: String,
    /// Upper bound on one rollout
    pub rollout_timeout: Duration,
    /// Interval between rollout status polls
    pub rollout_poll_interval: Duration,
    /// Upper bound on opening a database connection
    pub connect_timeout: Duration,
    /// Upper bound on one health probe
    pub health_timeout: Duration,
    /// Owner applied to the rewritten config file, `None` to leave it alone
    pub file_owner: Option<FileOwner>,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            region: String::new(),
            slots_secret_id: String::new(),
            admin_secret_id: String::new(),
            sites_root: PathBuf::new(),
            namespace: String::new(),
            deployment: String::new(),
            mirror_secret: String::new(),
            health_url: None,
            app_user_prefix: "openemr".into(),
            rollout_timeout: Duration::from_secs(1800),
            rollout_poll_interval: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
            health_timeout: Duration::from_secs(10),
            file_owner: Some(FileOwner::default()),
        }
    }
}

impl RotationConfig {
    /// Check required inputs and bounds
    ///
    /// Every missing required input is reported in one error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("AWS_REGION", self.region.is_empty()),
            ("RDS_SLOT_SECRET_ID", self.slots_secret_id.is_empty()),
            ("RDS_ADMIN_SECRET_ID", self.admin_secret_id.is_empty()),
            (
                "OPENEMR_SITES_MOUNT_ROOT",
                self.sites_root.as_os_str().is_empty(),
            ),
            ("K8S_NAMESPACE", self.namespace.is_empty()),
            ("K8S_DEPLOYMENT_NAME", self.deployment.is_empty()),
            ("K8S_SECRET_NAME", self.mirror_secret.is_empty()),
        ];
        let missing: Vec<String> = required
            .iter()
            .filter(|(_, absent)| *absent)
            .map(|(name, _)| (*name).to_owned())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingRequired { fields: missing });
        }

        if self.app_user_prefix.is_empty()
            || !self
                .app_user_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::InvalidValue {
                field: "app_user_prefix".into(),
                reason: "must match [A-Za-z0-9_]+".into(),
            });
        }

        for (field, value) in [
            ("rollout_timeout", self.rollout_timeout),
            ("rollout_poll_interval", self.rollout_poll_interval),
            ("connect_timeout", self.connect_timeout),
            ("health_timeout", self.health_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    reason: "must be greater than 0".into(),
                });
            }
        }

        Ok(())
    }

    /// Workload and mirror coordinates
    pub fn workload(&self) -> WorkloadTarget {
        WorkloadTarget {
            namespace: self.namespace.clone(),
            deployment: self.deployment.clone(),
            mirror_secret: self.mirror_secret.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn complete() -> RotationConfig {
        RotationConfig {
            region: "us-west-2".into(),
            slots_secret_id: "slots".into(),
            admin_secret_id: "admin".into(),
            sites_root: "/mnt/sites".into(),
            namespace: "openemr".into(),
            deployment: "openemr".into(),
            mirror_secret: "openemr-db-credentials".into(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = RotationConfig::default();
        assert_eq!(config.app_user_prefix, "openemr");
        assert_eq!(config.rollout_timeout, Duration::from_secs(1800));
        assert_eq!(config.rollout_poll_interval, Duration::from_secs(15));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.health_timeout, Duration::from_secs(10));
        assert_eq!(config.file_owner, Some(FileOwner { uid: 1000, gid: 101 }));
    }

    #[test]
    fn complete_config_validates() {
        complete().validate().unwrap();
    }

    #[test]
    fn reports_every_missing_field() {
        let config = RotationConfig {
            region: "us-west-2".into(),
            ..Default::default()
        };
        match config.validate() {
            Err(ConfigError::MissingRequired { fields }) => assert_eq!(
                fields,
                vec![
                    "RDS_SLOT_SECRET_ID",
                    "RDS_ADMIN_SECRET_ID",
                    "OPENEMR_SITES_MOUNT_ROOT",
                    "K8S_NAMESPACE",
                    "K8S_DEPLOYMENT_NAME",
                    "K8S_SECRET_NAME",
                ]
            ),
            other => panic!("expected MissingRequired, got {other:?}"),
        }
    }

    #[test]
    fn rejects_zero_timeouts() {
        let config = RotationConfig {
            rollout_poll_interval: Duration::ZERO,
            ..complete()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "rollout_poll_interval"
        ));
    }

    #[test]
    fn rejects_unsafe_prefix() {
        let config = RotationConfig {
            app_user_prefix: "emr-app".into(),
            ..complete()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn workload_target_mirrors_fields() {
        let target = complete().workload();
        assert_eq!(target.mirror_secret, "openemr-db-credentials");
        assert_eq!(target.namespace, "openemr");
    }
}
