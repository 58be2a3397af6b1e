//! Error types for rotation operations
//!
//! One enum per concern, all converging on [`RotationError`]:
//! - [`ConfigError`]: missing or invalid runtime inputs (fatal before any work)
//! - [`StoreError`]: secret store transport, decoding, and state corruption
//! - [`RuntimeConfigError`]: the live config file on disk
//! - [`ClusterError`]: credential mirror patching and rollouts
//! - [`DatabaseError`]: provisioning statements and logins
//! - [`ValidationError`]: end-to-end connectivity proofs
//!
//! # Error Conversion
//!
//! ```
//! use dualslot_rotation::{RotationError, StoreError};
//!
//! let err: RotationError = StoreError::NotFound { id: "rds-slots".into() }.into();
//! assert!(err.to_string().contains("rds-slots"));
//! ```

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for rotation operations
pub type RotationResult<T> = Result<T, RotationError>;

/// Top-level rotation error
#[derive(Debug, Error)]
pub enum RotationError {
    /// Runtime inputs are missing or invalid
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Secret store failure or corrupt stored state
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Live config file could not be read, rendered, or written
    #[error(transparent)]
    RuntimeConfig(#[from] RuntimeConfigError),

    /// Cluster API failure or rollout timeout
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// Database provisioning failure
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// A credential did not prove itself against the database
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Neither the stored admin password nor any slot password opens a connection
    #[error(
        "admin credentials for '{username}' are invalid and no fallback password was found; \
         reset the database administrator password manually"
    )]
    AdminRecoveryExhausted {
        /// Administrator account name
        username: String,
    },

    /// The cutover failed and restoring the previous state failed as well
    #[error("cutover failed ({original}) and rollback failed ({rollback})")]
    RollbackFailed {
        /// Error that triggered the rollback
        original: Box<RotationError>,
        /// Error raised by the compensation sequence
        rollback: Box<RotationError>,
    },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required settings are absent
    #[error("missing required configuration: {}", fields.join(", "))]
    MissingRequired {
        /// Names of every missing setting
        fields: Vec<String>,
    },

    /// A setting is present but unusable
    #[error("invalid configuration: {field}: {reason}")]
    InvalidValue {
        /// Setting name
        field: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Secret store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Secret does not exist
    #[error("secret '{id}' not found")]
    NotFound {
        /// Secret identifier
        id: String,
    },

    /// Secret payload is not valid JSON of the expected shape
    #[error("secret '{id}' could not be decoded: {source}")]
    Decode {
        /// Secret identifier
        id: String,
        /// Underlying JSON error
        #[source]
        source: serde_json::Error,
    },

    /// Secret decoded but violates a state invariant
    #[error("invalid state in secret '{id}': {reason}")]
    InvalidState {
        /// Secret identifier
        id: String,
        /// Violated invariant
        reason: String,
    },

    /// A slot label other than `A` or `B`
    #[error("invalid slot label: {value:?}")]
    InvalidInput {
        /// Rejected value
        value: String,
    },

    /// Transport or authorization failure while reading
    #[error("failed to read secret '{id}': {reason}")]
    Read {
        /// Secret identifier
        id: String,
        /// Backend message
        reason: String,
    },

    /// Transport or authorization failure while writing
    #[error("failed to write secret '{id}': {reason}")]
    Write {
        /// Secret identifier
        id: String,
        /// Backend message
        reason: String,
    },
}

/// Live config file errors
#[derive(Debug, Error)]
pub enum RuntimeConfigError {
    /// Config file is not at the discovered location
    #[error("runtime config not found at {}", path.display())]
    NotFound {
        /// Expected path
        path: PathBuf,
    },

    /// A managed assignment is missing from the file
    #[error("unable to locate ${field} assignment in runtime config")]
    FieldNotFound {
        /// Config-file variable name
        field: &'static str,
    },

    /// A value cannot be expressed in the config grammar
    #[error("value for ${field} is empty or contains a quote, backslash, or line break")]
    InvalidValue {
        /// Config-file variable name
        field: &'static str,
    },

    /// Filesystem failure
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Cluster errors
#[derive(Debug, Error)]
pub enum ClusterError {
    /// API call failed (transport, authorization, or missing object)
    #[error("cluster API call '{operation}' failed: {reason}")]
    Api {
        /// Operation name
        operation: String,
        /// Backend message
        reason: String,
    },

    /// Rollout did not converge before the deadline
    #[error("workload '{workload}' rollout did not complete within {}s", timeout.as_secs())]
    RolloutTimeout {
        /// Workload name
        workload: String,
        /// Deadline that elapsed
        timeout: Duration,
    },
}

/// Database errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Connection could not be established or authenticated
    #[error("cannot connect to {host}:{port} as '{username}': {reason}")]
    Connect {
        /// Database host
        host: String,
        /// Database port
        port: u16,
        /// Login name
        username: String,
        /// Driver message
        reason: String,
    },

    /// Statement failed
    #[error("statement failed: {reason}")]
    Query {
        /// Driver message
        reason: String,
    },

    /// Connect did not finish in time
    #[error("connection to {host} timed out after {}s", timeout.as_secs())]
    Timeout {
        /// Database host
        host: String,
        /// Connect timeout
        timeout: Duration,
    },

    /// Identifier outside `[A-Za-z0-9_]+`
    #[error("unsupported {kind} for rotation: {value:?}")]
    UnsupportedIdentifier {
        /// `username` or `dbname`
        kind: &'static str,
        /// Rejected identifier
        value: String,
    },

    /// Port is not a valid TCP port number
    #[error("invalid port: {value:?}")]
    InvalidPort {
        /// Rejected port string
        value: String,
    },
}

impl DatabaseError {
    /// Whether the server answered and refused the login
    ///
    /// A timeout says nothing about the password, so it is not a rejection.
    pub fn is_rejected_login(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Credential could not open a working connection
    #[error("validation connection failed for '{username}': {source}")]
    Connection {
        /// Login name
        username: String,
        /// Underlying database error
        #[source]
        source: DatabaseError,
    },

    /// Round-trip query returned something other than `1`
    #[error("validation query returned unexpected result: {value:?}")]
    UnexpectedResult {
        /// Value returned
        value: Option<i64>,
    },
}
