//! Logger configuration

mod presets;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Logger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `EnvFilter` directive, e.g. `info` or `dualslot_rotation=debug`
    pub level: String,
    /// Output format
    pub format: Format,
    /// Presentation options
    pub display: DisplayConfig,
    /// Recorded on a root span around all output
    pub service: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: Format::Compact,
            display: DisplayConfig::default(),
            service: None,
        }
    }
}

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Multi-line, human oriented
    Pretty,
    /// Single line per event
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

impl FromStr for Format {
    type Err = std::convert::Infallible;

    /// Unknown names fall back to [`Format::Compact`]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Self::Pretty,
            "json" => Self::Json,
            _ => Self::Compact,
        })
    }
}

/// Presentation options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// ANSI colors
    pub colors: bool,
    /// Event targets
    pub target: bool,
    /// Source file and line
    pub source: bool,
    /// Lift event fields to the top level of JSON output
    pub flatten: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            colors: true,
            target: true,
            source: false,
            flatten: true,
        }
    }
}

impl DisplayConfig {
    /// Apply `NO_COLOR` and `DUALSLOT_LOG_SOURCE`
    pub(crate) fn apply_vars(&mut self, var: &impl Fn(&str) -> Option<String>) {
        if var("NO_COLOR").is_some_and(|v| !v.is_empty()) {
            self.colors = false;
        }
        if let Some(source) = var("DUALSLOT_LOG_SOURCE") {
            self.source = matches!(source.as_str(), "1" | "true" | "yes");
        }
    }
}
