//! In-memory backends for tests
//!
//! Each fake records the calls it receives and can be told to fail its next
//! call, so every rotation branch can be driven deterministically without a
//! secret store, a cluster, or a database.
//!
//! ```rust
//! use dualslot_rotation::testing::InMemorySecretBackend;
//!
//! let backend = InMemorySecretBackend::new();
//! backend.insert("slots", r#"{"active_slot":"A","A":{},"B":{}}"#);
//! assert_eq!(backend.write_count(), 0);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::cluster::{ClusterRefresher, WorkloadTarget};
use crate::database::{Database, alter_admin_statement, parse_port, upsert_statements};
use crate::error::{ClusterError, DatabaseError, StoreError};
use crate::secret::SecretString;
use crate::slots::{AdminCredential, Slot};
use crate::store::SecretBackend;

/// Secret backend over a map
#[derive(Debug, Default)]
pub struct InMemorySecretBackend {
    secrets: Mutex<HashMap<String, String>>,
    fail_on_read: AtomicBool,
    fail_on_write: AtomicBool,
    read_count: AtomicU32,
    write_count: AtomicU32,
}

impl InMemorySecretBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a secret without counting a write
    pub fn insert(&self, id: &str, payload: &str) {
        self.secrets.lock().insert(id.to_owned(), payload.to_owned());
    }

    /// Current value of a secret
    pub fn get(&self, id: &str) -> Option<String> {
        self.secrets.lock().get(id).cloned()
    }

    /// Current value of a secret parsed as JSON
    pub fn get_json(&self, id: &str) -> Option<serde_json::Value> {
        self.get(id)
            .and_then(|payload| serde_json::from_str(&payload).ok())
    }

    /// Make the next read fail
    pub fn fail_next_read(&self) {
        self.fail_on_read.store(true, Ordering::SeqCst);
    }

    /// Make the next write fail
    pub fn fail_next_write(&self) {
        self.fail_on_write.store(true, Ordering::SeqCst);
    }

    /// Number of reads served
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::SeqCst)
    }

    /// Number of writes attempted
    pub fn write_count(&self) -> u32 {
        self.write_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretBackend for InMemorySecretBackend {
    async fn read(&self, id: &str) -> Result<String, StoreError> {
        self.read_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_read.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Read {
                id: id.to_owned(),
                reason: "mock failure".into(),
            });
        }
        self.get(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_owned() })
    }

    async fn write(&self, id: &str, payload: &str) -> Result<(), StoreError> {
        self.write_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_write.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Write {
                id: id.to_owned(),
                reason: "mock failure".into(),
            });
        }
        self.insert(id, payload);
        Ok(())
    }
}

/// Cluster refresher that records mirror contents and restarts
#[derive(Debug, Default)]
pub struct RecordingCluster {
    mirror: Mutex<Option<Slot>>,
    mirror_updates: Mutex<Vec<Slot>>,
    fail_on_update: AtomicBool,
    restart_failures: AtomicU32,
    restart_count: AtomicU32,
}

impl RecordingCluster {
    /// Create a cluster with an empty mirror
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cluster whose mirror already holds `slot`
    pub fn with_mirror(slot: Slot) -> Self {
        let cluster = Self::default();
        *cluster.mirror.lock() = Some(slot);
        cluster
    }

    /// Current mirror contents
    pub fn mirror(&self) -> Option<Slot> {
        self.mirror.lock().clone()
    }

    /// Every successful mirror update in order
    pub fn mirror_updates(&self) -> Vec<Slot> {
        self.mirror_updates.lock().clone()
    }

    /// Make the next mirror update fail
    pub fn fail_next_update(&self) {
        self.fail_on_update.store(true, Ordering::SeqCst);
    }

    /// Make the next restart time out
    pub fn fail_next_restart(&self) {
        self.fail_next_restarts(1);
    }

    /// Make the next `count` restarts time out
    pub fn fail_next_restarts(&self, count: u32) {
        self.restart_failures.store(count, Ordering::SeqCst);
    }

    /// Number of restarts triggered, failed ones included
    pub fn restart_count(&self) -> u32 {
        self.restart_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterRefresher for RecordingCluster {
    async fn update_mirror(
        &self,
        _target: &WorkloadTarget,
        slot: &Slot,
    ) -> Result<(), ClusterError> {
        if self.fail_on_update.swap(false, Ordering::SeqCst) {
            return Err(ClusterError::Api {
                operation: "patch_secret".into(),
                reason: "mock failure".into(),
            });
        }
        *self.mirror.lock() = Some(slot.clone());
        self.mirror_updates.lock().push(slot.clone());
        Ok(())
    }

    async fn restart_and_wait(
        &self,
        target: &WorkloadTarget,
        timeout: Duration,
    ) -> Result<(), ClusterError> {
        self.restart_count.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .restart_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ClusterError::RolloutTimeout {
                workload: target.deployment.clone(),
                timeout,
            });
        }
        Ok(())
    }
}

/// Database that tracks account passwords in a map
///
/// A login succeeds when the account exists with exactly that password. Hosts
/// and ports are ignored. Statements are still built, so identifier checks
/// behave as they do against a real server.
#[derive(Debug, Default)]
pub struct FakeDatabase {
    users: Mutex<HashMap<String, String>>,
    fail_on_upsert: AtomicBool,
    fail_on_select: AtomicBool,
    time_out_on_login: AtomicBool,
    login_count: AtomicU32,
    upsert_count: AtomicU32,
    alter_admin_count: AtomicU32,
}

impl FakeDatabase {
    /// Create a database with no accounts
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite an account
    pub fn set_user(&self, username: &str, password: &str) {
        self.users
            .lock()
            .insert(username.to_owned(), password.to_owned());
    }

    /// Current password of an account
    pub fn password_of(&self, username: &str) -> Option<String> {
        self.users.lock().get(username).cloned()
    }

    /// Whether `username` can log in with `password`
    pub fn accepts(&self, username: &str, password: &str) -> bool {
        self.users.lock().get(username).map(String::as_str) == Some(password)
    }

    /// Make the next account upsert fail
    pub fn fail_next_upsert(&self) {
        self.fail_on_upsert.store(true, Ordering::SeqCst);
    }

    /// Make the next round-trip query fail
    pub fn fail_next_select(&self) {
        self.fail_on_select.store(true, Ordering::SeqCst);
    }

    /// Make the next login check time out before the server answers
    pub fn time_out_next_login(&self) {
        self.time_out_on_login.store(true, Ordering::SeqCst);
    }

    /// Number of login checks
    pub fn login_count(&self) -> u32 {
        self.login_count.load(Ordering::SeqCst)
    }

    /// Number of account upserts applied
    pub fn upsert_count(&self) -> u32 {
        self.upsert_count.load(Ordering::SeqCst)
    }

    /// Number of admin password changes applied
    pub fn alter_admin_count(&self) -> u32 {
        self.alter_admin_count.load(Ordering::SeqCst)
    }

    /// Number of mutating statements applied
    pub fn write_count(&self) -> u32 {
        self.upsert_count() + self.alter_admin_count()
    }

    fn login(
        &self,
        host: &str,
        port: u16,
        username: &str,
        password: &SecretString,
    ) -> Result<(), DatabaseError> {
        if password.expose_secret(|p| self.accepts(username, p)) {
            Ok(())
        } else {
            Err(DatabaseError::Connect {
                host: host.to_owned(),
                port,
                username: username.to_owned(),
                reason: "access denied".into(),
            })
        }
    }
}

#[async_trait]
impl Database for FakeDatabase {
    async fn check_login(
        &self,
        host: &str,
        port: u16,
        username: &str,
        password: &SecretString,
    ) -> Result<(), DatabaseError> {
        self.login_count.fetch_add(1, Ordering::SeqCst);
        if self.time_out_on_login.swap(false, Ordering::SeqCst) {
            return Err(DatabaseError::Timeout {
                host: host.to_owned(),
                timeout: Duration::from_secs(5),
            });
        }
        self.login(host, port, username, password)
    }

    async fn select_one(&self, slot: &Slot) -> Result<i64, DatabaseError> {
        let port = parse_port(&slot.port)?;
        if self.fail_on_select.swap(false, Ordering::SeqCst) {
            return Err(DatabaseError::Query {
                reason: "mock failure".into(),
            });
        }
        self.login(&slot.host, port, &slot.username, &slot.password)?;
        Ok(1)
    }

    async fn upsert_app_user(
        &self,
        admin: &AdminCredential,
        slot: &Slot,
    ) -> Result<(), DatabaseError> {
        upsert_statements(slot)?;
        self.login(
            admin.endpoint_host(&slot.host),
            admin.port,
            &admin.username,
            &admin.password,
        )?;
        if self.fail_on_upsert.swap(false, Ordering::SeqCst) {
            return Err(DatabaseError::Query {
                reason: "mock failure".into(),
            });
        }
        self.upsert_count.fetch_add(1, Ordering::SeqCst);
        slot.password
            .expose_secret(|p| self.set_user(&slot.username, p));
        Ok(())
    }

    async fn alter_admin_password(
        &self,
        admin: &AdminCredential,
        host: &str,
        new_password: &SecretString,
    ) -> Result<(), DatabaseError> {
        alter_admin_statement(&admin.username, new_password)?;
        self.login(host, admin.port, &admin.username, &admin.password)?;
        self.alter_admin_count.fetch_add(1, Ordering::SeqCst);
        new_password.expose_secret(|p| self.set_user(&admin.username, p));
        Ok(())
    }
}
