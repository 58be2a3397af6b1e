//! Logging setup errors

use thiserror::Error;

/// Result alias for logging setup
pub type LogResult<T> = Result<T, LogError>;

/// Logging setup failure
#[derive(Debug, Error)]
pub enum LogError {
    /// Level directive could not be parsed
    #[error("invalid log filter `{directive}`: {reason}")]
    Filter {
        /// Directive as given
        directive: String,
        /// Parser message
        reason: String,
    },

    /// A global subscriber is already installed
    #[error("failed to install subscriber: {0}")]
    Init(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_error_names_directive() {
        let err = LogError::Filter {
            directive: "rotation=loud".into(),
            reason: "invalid level".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid log filter `rotation=loud`: invalid level"
        );
    }
}
