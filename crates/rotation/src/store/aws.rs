//! AWS Secrets Manager secret backend
//!
//! Reads with `GetSecretValue` and writes with `PutSecretValue`, so every
//! persist creates a new secret version. The secrets must already exist.
//!
//! # Configuration
//!
//! ```rust,ignore
//! use dualslot_rotation::store::{AwsSecretsManagerBackend, SlotStore};
//! use std::sync::Arc;
//!
//! let backend = AwsSecretsManagerBackend::new("us-west-2").await;
//! let store = SlotStore::new(Arc::new(backend));
//! ```

use async_trait::async_trait;
use aws_sdk_secretsmanager::Client as SecretsManagerClient;
use aws_sdk_secretsmanager::error::DisplayErrorContext;

use super::SecretBackend;
use crate::error::StoreError;

/// Secret backend over AWS Secrets Manager
#[derive(Debug, Clone)]
pub struct AwsSecretsManagerBackend {
    client: SecretsManagerClient,
}

impl AwsSecretsManagerBackend {
    /// Build a client for `region` from the default credential chain
    pub async fn new(region: &str) -> Self {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_owned()))
            .load()
            .await;

        tracing::info!(
            provider = "AWS Secrets Manager",
            region = %region,
            "Initialized secret backend"
        );

        Self::from_client(SecretsManagerClient::new(&sdk_config))
    }

    /// Wrap an already configured client
    pub fn from_client(client: SecretsManagerClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretBackend for AwsSecretsManagerBackend {
    #[tracing::instrument(skip(self), fields(provider = "AWS"))]
    async fn read(&self, id: &str) -> Result<String, StoreError> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(id)
            .send()
            .await
            .map_err(|e| {
                let not_found = e
                    .as_service_error()
                    .is_some_and(|se| se.is_resource_not_found_exception());
                if not_found {
                    StoreError::NotFound { id: id.to_owned() }
                } else {
                    StoreError::Read {
                        id: id.to_owned(),
                        reason: DisplayErrorContext(&e).to_string(),
                    }
                }
            })?;

        output
            .secret_string()
            .map(str::to_owned)
            .ok_or_else(|| StoreError::Read {
                id: id.to_owned(),
                reason: "secret does not contain string data".into(),
            })
    }

    #[tracing::instrument(skip(self, payload), fields(provider = "AWS"))]
    async fn write(&self, id: &str, payload: &str) -> Result<(), StoreError> {
        self.client
            .put_secret_value()
            .secret_id(id)
            .secret_string(payload)
            .send()
            .await
            .map_err(|e| StoreError::Write {
                id: id.to_owned(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        tracing::debug!("Wrote new secret version");
        Ok(())
    }
}
