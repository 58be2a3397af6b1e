//! Cluster Refresher
//!
//! Two operations keep the running workload on the credential the live
//! config points at:
//!
//! - [`ClusterRefresher::update_mirror`] patches the cluster-held credential
//!   object so instances restarted for any reason start with working values
//! - [`ClusterRefresher::restart_and_wait`] replaces every instance and blocks
//!   until the rollout converges or the timeout elapses
//!
//! Polling uses a fixed interval. Rollouts take minutes, so backoff buys
//! nothing.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ClusterError;
use crate::slots::Slot;

#[cfg(feature = "kubernetes")]
mod kubernetes;

#[cfg(feature = "kubernetes")]
pub use kubernetes::KubeClusterRefresher;

/// Mirror key holding the database host
pub const MIRROR_HOST_KEY: &str = "mysql-host";
/// Mirror key holding the login name
pub const MIRROR_USER_KEY: &str = "mysql-user";
/// Mirror key holding the password
pub const MIRROR_PASSWORD_KEY: &str = "mysql-password";
/// Mirror key holding the database name
pub const MIRROR_DATABASE_KEY: &str = "mysql-database";

/// Pod-template annotation bumped to force a rolling restart
pub const RESTART_ANNOTATION: &str = "credential-rotation/restartedAt";

/// Where the workload and its credential mirror live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadTarget {
    /// Namespace of both objects
    pub namespace: String,
    /// Deployment to restart
    pub deployment: String,
    /// Secret mirroring the live credential
    pub mirror_secret: String,
}

/// Cluster operations used during cutover and rollback
#[async_trait]
pub trait ClusterRefresher: Send + Sync {
    /// Patch the credential mirror to `slot`'s host, user, password and database
    ///
    /// # Errors
    ///
    /// - `ClusterError::Api` on transport, authorization, or missing object
    async fn update_mirror(&self, target: &WorkloadTarget, slot: &Slot)
    -> Result<(), ClusterError>;

    /// Restart every instance of the workload and wait for convergence
    ///
    /// # Errors
    ///
    /// - `ClusterError::Api` if the restart cannot be triggered or polled
    /// - `ClusterError::RolloutTimeout` if `timeout` elapses first
    async fn restart_and_wait(
        &self,
        target: &WorkloadTarget,
        timeout: Duration,
    ) -> Result<(), ClusterError>;
}

/// Plain-text mirror entries for `slot`
pub fn mirror_entries(slot: &Slot) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MIRROR_HOST_KEY.to_owned(), slot.host.clone()),
        (MIRROR_USER_KEY.to_owned(), slot.username.clone()),
        (
            MIRROR_PASSWORD_KEY.to_owned(),
            slot.password.expose_secret(str::to_owned),
        ),
        (MIRROR_DATABASE_KEY.to_owned(), slot.dbname.clone()),
    ])
}

/// Replica counts observed on one poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RolloutStatus {
    /// Requested replicas, `None` if unset
    pub desired: Option<i32>,
    /// Replicas running the newest template
    pub updated: i32,
    /// Replicas passing readiness
    pub ready: i32,
    /// Replicas available to serve
    pub available: i32,
    /// Replicas still unavailable
    pub unavailable: i32,
    /// Spec generation the restart produced, `None` if unknown
    pub generation: Option<i64>,
    /// Generation the controller has acted on
    pub observed_generation: Option<i64>,
}

impl RolloutStatus {
    /// Replica target, `1` when the spec leaves it unset
    pub fn target(&self) -> i32 {
        self.desired.unwrap_or(1)
    }

    /// Whether the controller has seen the restart's generation
    pub fn is_observed(&self) -> bool {
        match self.generation {
            Some(generation) => self
                .observed_generation
                .is_some_and(|observed| observed >= generation),
            None => true,
        }
    }

    /// Whether every replica runs the new template and none are unavailable
    ///
    /// Replica counts from before the controller observed the restart describe
    /// the old template, so they never count as complete.
    pub fn is_complete(&self) -> bool {
        let target = self.target();
        self.is_observed()
            && self.updated >= target
            && self.ready >= target
            && self.available >= target
            && self.unavailable == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn counts(
        desired: Option<i32>,
        updated: i32,
        ready: i32,
        available: i32,
        unavailable: i32,
    ) -> RolloutStatus {
        RolloutStatus {
            desired,
            updated,
            ready,
            available,
            unavailable,
            ..RolloutStatus::default()
        }
    }

    fn at_generation(generation: i64, observed: Option<i64>) -> RolloutStatus {
        RolloutStatus {
            generation: Some(generation),
            observed_generation: observed,
            ..counts(Some(2), 2, 2, 2, 0)
        }
    }

    #[rstest]
    #[case(counts(Some(2), 2, 2, 2, 0), true)]
    #[case(counts(Some(2), 2, 1, 2, 0), false)]
    #[case(counts(Some(2), 1, 2, 2, 0), false)]
    #[case(counts(Some(2), 2, 2, 2, 1), false)]
    #[case(counts(None, 1, 1, 1, 0), true)]
    #[case(counts(None, 0, 0, 0, 0), false)]
    #[case::observed(at_generation(5, Some(5)), true)]
    #[case::observed_newer(at_generation(5, Some(6)), true)]
    #[case::stale_generation(at_generation(5, Some(4)), false)]
    #[case::never_observed(at_generation(5, None), false)]
    fn rollout_convergence(#[case] status: RolloutStatus, #[case] complete: bool) {
        assert_eq!(status.is_complete(), complete);
    }

    #[test]
    fn mirror_entries_cover_four_keys() {
        let slot = Slot {
            username: "openemr_b".into(),
            password: "pw".into(),
            host: "db".into(),
            port: "3306".into(),
            dbname: "openemr".into(),
        };
        let entries = mirror_entries(&slot);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[MIRROR_USER_KEY], "openemr_b");
        assert_eq!(entries[MIRROR_PASSWORD_KEY], "pw");
    }
}
