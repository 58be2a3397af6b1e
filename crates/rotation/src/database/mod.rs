//! Database provisioning and connectivity
//!
//! The orchestrator never speaks SQL directly. [`Database`] exposes the four
//! things a rotation needs: a login probe, a round-trip query, idempotent
//! create-or-alter of an application account, and an admin password change.
//!
//! Statements that carry identifiers and passwords are built here. Identifiers
//! must match `[A-Za-z0-9_]+`; password literals are escaped.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::secret::SecretString;
use crate::slots::{AdminCredential, Slot};

#[cfg(feature = "mysql")]
mod mysql;

#[cfg(feature = "mysql")]
pub use mysql::MySqlDatabase;

/// Database operations used by a rotation
#[async_trait]
pub trait Database: Send + Sync {
    /// Open and close a TLS connection to `host:port` as `username`
    async fn check_login(
        &self,
        host: &str,
        port: u16,
        username: &str,
        password: &SecretString,
    ) -> Result<(), DatabaseError>;

    /// Connect as `slot` to its database and return the value of `SELECT 1`
    async fn select_one(&self, slot: &Slot) -> Result<i64, DatabaseError>;

    /// Create or update `slot`'s account with full privileges on its database
    ///
    /// Connects as `admin`; the admin host falls back to the slot host.
    async fn upsert_app_user(&self, admin: &AdminCredential, slot: &Slot)
    -> Result<(), DatabaseError>;

    /// Change the admin account's password, connecting with its current one
    async fn alter_admin_password(
        &self,
        admin: &AdminCredential,
        host: &str,
        new_password: &SecretString,
    ) -> Result<(), DatabaseError>;
}

/// Reject identifiers outside `[A-Za-z0-9_]+`
pub fn validate_identifier(kind: &'static str, value: &str) -> Result<(), DatabaseError> {
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(DatabaseError::UnsupportedIdentifier {
            kind,
            value: value.to_owned(),
        })
    }
}

/// Parse a stored port string
pub fn parse_port(value: &str) -> Result<u16, DatabaseError> {
    value
        .trim()
        .parse()
        .map_err(|_| DatabaseError::InvalidPort {
            value: value.to_owned(),
        })
}

/// Quote `value` as a MySQL string literal
pub fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\'' => quoted.push_str("''"),
            '\\' => quoted.push_str("\\\\"),
            '\0' => quoted.push_str("\\0"),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

/// Statements that create or realign `slot`'s account
///
/// `CREATE USER IF NOT EXISTS` leaves an existing account untouched, so the
/// following `ALTER USER` sets the password either way.
pub fn upsert_statements(slot: &Slot) -> Result<Vec<String>, DatabaseError> {
    validate_identifier("username", &slot.username)?;
    validate_identifier("dbname", &slot.dbname)?;

    let account = format!("{}@'%'", quote_literal(&slot.username));
    let password = slot.password.expose_secret(quote_literal);

    Ok(vec![
        format!("CREATE USER IF NOT EXISTS {account} IDENTIFIED BY {password} REQUIRE SSL"),
        format!("ALTER USER {account} IDENTIFIED BY {password} REQUIRE SSL"),
        format!("GRANT ALL PRIVILEGES ON `{}`.* TO {account}", slot.dbname),
        "FLUSH PRIVILEGES".to_owned(),
    ])
}

/// Statement that changes the admin password
pub fn alter_admin_statement(
    username: &str,
    new_password: &SecretString,
) -> Result<String, DatabaseError> {
    validate_identifier("username", username)?;
    Ok(format!(
        "ALTER USER {}@'%' IDENTIFIED BY {}",
        quote_literal(username),
        new_password.expose_secret(quote_literal)
    ))
}
