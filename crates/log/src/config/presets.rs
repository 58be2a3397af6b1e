//! Configuration presets for common scenarios

use super::{Config, DisplayConfig, Format};

impl Config {
    /// Create configuration from environment variables
    ///
    /// `DUALSLOT_LOG` (then `RUST_LOG`) sets the level and
    /// `DUALSLOT_LOG_FORMAT` the format.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup
    #[must_use]
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(level) = var("DUALSLOT_LOG").or_else(|| var("RUST_LOG")) {
            config.level = level;
        }

        if let Some(format) = var("DUALSLOT_LOG_FORMAT")
            && let Ok(format) = format.parse()
        {
            config.format = format;
        }

        config.display.apply_vars(&var);
        config
    }

    /// Development configuration (pretty, debug level)
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_owned(),
            format: Format::Pretty,
            display: DisplayConfig {
                colors: true,
                source: true,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }

    /// Production configuration (JSON, info level)
    #[must_use]
    pub fn production() -> Self {
        Self {
            level: "info".to_owned(),
            format: Format::Json,
            display: DisplayConfig {
                colors: false,
                source: false,
                flatten: true,
                ..DisplayConfig::default()
            },
            ..Self::default()
        }
    }

    /// Name the service on the root span
    #[must_use]
    pub fn with_service(self, service: impl Into<String>) -> Self {
        Self {
            service: Some(service.into()),
            ..self
        }
    }

    /// Switch to JSON output, keeping the level
    #[must_use]
    pub fn with_json(self) -> Self {
        Self {
            format: Format::Json,
            display: DisplayConfig {
                colors: false,
                ..self.display
            },
            ..self
        }
    }
}
