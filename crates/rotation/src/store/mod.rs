//! Slot Store client
//!
//! [`SecretBackend`] moves raw secret strings; [`SlotStore`] layers the typed
//! slot and admin documents on top of it. Writes are whole-document
//! overwrites with no version check: the last writer wins, and a single
//! rotation process at a time is assumed.
//!
//! # Backends
//!
//! - [`AwsSecretsManagerBackend`] - AWS Secrets Manager (feature `aws`)
//! - [`crate::testing::InMemorySecretBackend`] - in-memory map for tests

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::slots::{AdminCredential, SlotSecretState};

#[cfg(feature = "aws")]
mod aws;

#[cfg(feature = "aws")]
pub use aws::AwsSecretsManagerBackend;

/// Raw secret persistence
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Read the current string value of secret `id`
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the secret does not exist
    /// - `StoreError::Read` on transport or authorization failure
    async fn read(&self, id: &str) -> Result<String, StoreError>;

    /// Replace the value of secret `id` with a new version
    ///
    /// # Errors
    ///
    /// - `StoreError::Write` on transport or authorization failure
    async fn write(&self, id: &str, payload: &str) -> Result<(), StoreError>;
}

/// Typed access to the slot and admin documents
#[derive(Clone)]
pub struct SlotStore {
    backend: Arc<dyn SecretBackend>,
}

impl SlotStore {
    /// Create a store over `backend`
    pub fn new(backend: Arc<dyn SecretBackend>) -> Self {
        Self { backend }
    }

    /// Fetch and decode the slot document
    #[tracing::instrument(skip(self))]
    pub async fn get_slots(&self, id: &str) -> Result<SlotSecretState, StoreError> {
        let payload = self.backend.read(id).await?;
        let state = SlotSecretState::from_json(id, &payload)?;
        tracing::debug!(active = %state.active(), "Loaded slot document");
        Ok(state)
    }

    /// Overwrite the slot document
    #[tracing::instrument(skip(self, state), fields(id = %state.id(), active = %state.active()))]
    pub async fn put_slots(&self, state: &SlotSecretState) -> Result<(), StoreError> {
        let payload = state.to_json()?;
        self.backend.write(state.id(), &payload).await?;
        tracing::info!("Persisted slot document");
        Ok(())
    }

    /// Fetch and decode the admin document
    #[tracing::instrument(skip(self))]
    pub async fn get_admin(&self, id: &str) -> Result<AdminCredential, StoreError> {
        let payload = self.backend.read(id).await?;
        AdminCredential::from_json(id, &payload)
    }

    /// Overwrite the admin document
    #[tracing::instrument(skip(self, admin), fields(username = %admin.username))]
    pub async fn put_admin(&self, id: &str, admin: &AdminCredential) -> Result<(), StoreError> {
        let payload = admin.to_json(id)?;
        self.backend.write(id, &payload).await?;
        tracing::info!("Persisted admin document");
        Ok(())
    }
}

impl std::fmt::Debug for SlotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotStore").finish_non_exhaustive()
    }
}
