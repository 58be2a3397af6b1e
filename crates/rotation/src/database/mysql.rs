//! MySQL database backend
//!
//! Every operation opens a single short-lived connection with TLS required
//! and a bounded connect time, runs its statements, and closes it. There is
//! no pool: a rotation makes a handful of connections over several minutes.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlSslMode};
use sqlx::{ConnectOptions, Connection, Executor};

use super::{Database, alter_admin_statement, parse_port, upsert_statements};
use crate::error::DatabaseError;
use crate::secret::SecretString;
use crate::slots::{AdminCredential, Slot};

/// Database backend over `sqlx` MySQL connections
#[derive(Debug, Clone)]
pub struct MySqlDatabase {
    connect_timeout: Duration,
}

impl MySqlDatabase {
    /// Create a backend whose connects give up after `connect_timeout`
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn connect(
        &self,
        host: &str,
        port: u16,
        username: &str,
        password: &SecretString,
        database: Option<&str>,
    ) -> Result<MySqlConnection, DatabaseError> {
        let mut options = password.expose_secret(|secret| {
            MySqlConnectOptions::new()
                .host(host)
                .port(port)
                .username(username)
                .password(secret)
                .ssl_mode(MySqlSslMode::Required)
        });
        if let Some(database) = database {
            options = options.database(database);
        }

        match tokio::time::timeout(self.connect_timeout, options.connect()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(DatabaseError::Connect {
                host: host.to_owned(),
                port,
                username: username.to_owned(),
                reason: e.to_string(),
            }),
            Err(_) => Err(DatabaseError::Timeout {
                host: host.to_owned(),
                timeout: self.connect_timeout,
            }),
        }
    }

    async fn execute_all(
        conn: &mut MySqlConnection,
        statements: &[String],
    ) -> Result<(), DatabaseError> {
        for statement in statements {
            (&mut *conn)
                .execute(sqlx::raw_sql(statement))
                .await
                .map_err(query_error)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Database for MySqlDatabase {
    #[tracing::instrument(skip(self, password))]
    async fn check_login(
        &self,
        host: &str,
        port: u16,
        username: &str,
        password: &SecretString,
    ) -> Result<(), DatabaseError> {
        let conn = self.connect(host, port, username, password, None).await?;
        conn.close().await.map_err(query_error)
    }

    #[tracing::instrument(skip(self, slot), fields(username = %slot.username, host = %slot.host))]
    async fn select_one(&self, slot: &Slot) -> Result<i64, DatabaseError> {
        let port = parse_port(&slot.port)?;
        let mut conn = self
            .connect(
                &slot.host,
                port,
                &slot.username,
                &slot.password,
                Some(&slot.dbname),
            )
            .await?;
        let value = sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&mut conn)
            .await
            .map_err(query_error)?;
        conn.close().await.map_err(query_error)?;
        Ok(value)
    }

    #[tracing::instrument(skip(self, admin, slot), fields(username = %slot.username, dbname = %slot.dbname))]
    async fn upsert_app_user(
        &self,
        admin: &AdminCredential,
        slot: &Slot,
    ) -> Result<(), DatabaseError> {
        let statements = upsert_statements(slot)?;
        let host = admin.endpoint_host(&slot.host);
        let mut conn = self
            .connect(host, admin.port, &admin.username, &admin.password, None)
            .await?;
        Self::execute_all(&mut conn, &statements).await?;
        conn.close().await.map_err(query_error)?;
        tracing::info!("Application account provisioned");
        Ok(())
    }

    #[tracing::instrument(skip(self, admin, new_password), fields(username = %admin.username))]
    async fn alter_admin_password(
        &self,
        admin: &AdminCredential,
        host: &str,
        new_password: &SecretString,
    ) -> Result<(), DatabaseError> {
        let statement = alter_admin_statement(&admin.username, new_password)?;
        let mut conn = self
            .connect(host, admin.port, &admin.username, &admin.password, None)
            .await?;
        Self::execute_all(&mut conn, &[statement]).await?;
        conn.close().await.map_err(query_error)?;
        tracing::info!("Admin password changed");
        Ok(())
    }
}

fn query_error(error: sqlx::Error) -> DatabaseError {
    DatabaseError::Query {
        reason: error.to_string(),
    }
}
