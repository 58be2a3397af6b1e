//! Kubernetes cluster refresher
//!
//! Patches an Opaque `Secret` with a JSON merge patch and restarts a
//! `Deployment` by bumping a pod-template annotation, the same mechanism as
//! `kubectl rollout restart`. Convergence is read from the deployment status.
//!
//! # Configuration
//!
//! ```rust,ignore
//! use dualslot_rotation::cluster::KubeClusterRefresher;
//! use std::time::Duration;
//!
//! // In-cluster service account, else the local kubeconfig
//! let refresher = KubeClusterRefresher::try_default(Duration::from_secs(15)).await?;
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use k8s_openapi::ByteString;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use tokio::time::Instant;

use super::{ClusterRefresher, RESTART_ANNOTATION, RolloutStatus, WorkloadTarget, mirror_entries};
use crate::error::ClusterError;
use crate::slots::Slot;

/// Cluster refresher over the Kubernetes API
#[derive(Clone)]
pub struct KubeClusterRefresher {
    client: Client,
    poll_interval: Duration,
}

impl KubeClusterRefresher {
    /// Connect with the inferred configuration
    pub async fn try_default(poll_interval: Duration) -> Result<Self, ClusterError> {
        let client = Client::try_default()
            .await
            .map_err(api_error("connect"))?;

        tracing::info!(
            provider = "Kubernetes",
            poll_secs = poll_interval.as_secs(),
            "Initialized cluster refresher"
        );

        Ok(Self::new(client, poll_interval))
    }

    /// Wrap an existing client
    pub fn new(client: Client, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }

    /// Poll the deployment; `restart_generation` is the generation the restart patch returned
    async fn rollout_status(
        &self,
        api: &Api<Deployment>,
        name: &str,
        restart_generation: Option<i64>,
    ) -> Result<RolloutStatus, ClusterError> {
        let deployment = api.get(name).await.map_err(api_error("read_deployment"))?;
        let generation = restart_generation.max(deployment.metadata.generation);
        let status = deployment.status.unwrap_or_default();
        Ok(RolloutStatus {
            generation,
            observed_generation: status.observed_generation,
            desired: deployment.spec.and_then(|spec| spec.replicas),
            updated: status.updated_replicas.unwrap_or(0),
            ready: status.ready_replicas.unwrap_or(0),
            available: status.available_replicas.unwrap_or(0),
            unavailable: status.unavailable_replicas.unwrap_or(0),
        })
    }
}

impl std::fmt::Debug for KubeClusterRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterRefresher")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ClusterRefresher for KubeClusterRefresher {
    #[tracing::instrument(
        skip(self, slot),
        fields(namespace = %target.namespace, secret = %target.mirror_secret, username = %slot.username)
    )]
    async fn update_mirror(
        &self,
        target: &WorkloadTarget,
        slot: &Slot,
    ) -> Result<(), ClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &target.namespace);

        let data: BTreeMap<String, ByteString> = mirror_entries(slot)
            .into_iter()
            .map(|(key, value)| (key, ByteString(value.into_bytes())))
            .collect();
        let patch = Secret {
            data: Some(data),
            ..Default::default()
        };

        api.patch(
            &target.mirror_secret,
            &PatchParams::default(),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(api_error("patch_secret"))?;

        tracing::info!("Credential mirror updated");
        Ok(())
    }

    #[tracing::instrument(
        skip(self),
        fields(namespace = %target.namespace, deployment = %target.deployment)
    )]
    async fn restart_and_wait(
        &self,
        target: &WorkloadTarget,
        timeout: Duration,
    ) -> Result<(), ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &target.namespace);

        let restarted_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let patch = serde_json::json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": { RESTART_ANNOTATION: restarted_at }
                    }
                }
            }
        });
        let patched = api
            .patch(
                &target.deployment,
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(api_error("restart_deployment"))?;
        let restart_generation = patched.metadata.generation;
        tracing::info!(%restarted_at, generation = ?restart_generation, "Rolling restart triggered");

        let deadline = Instant::now() + timeout;
        loop {
            let status = self
                .rollout_status(&api, &target.deployment, restart_generation)
                .await?;
            if status.is_complete() {
                tracing::info!(
                    ready = status.ready,
                    target = status.target(),
                    "Rollout complete"
                );
                return Ok(());
            }

            tracing::info!(
                updated = status.updated,
                ready = status.ready,
                available = status.available,
                target = status.target(),
                observed = status.is_observed(),
                "Rollout in progress"
            );

            let now = Instant::now();
            if now >= deadline {
                return Err(ClusterError::RolloutTimeout {
                    workload: target.deployment.clone(),
                    timeout,
                });
            }
            // The last sleep ends at the deadline so one final poll still runs
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

fn api_error(operation: &'static str) -> impl Fn(kube::Error) -> ClusterError {
    move |error| {
        let reason = match &error {
            kube::Error::Api(response) if response.code == 404 => {
                format!("object not found: {}", response.message)
            }
            _ => error.to_string(),
        };
        ClusterError::Api {
            operation: operation.to_owned(),
            reason,
        }
    }
}
