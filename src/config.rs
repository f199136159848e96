//! Configuration loading and management.
//!
//! Configuration is loaded from multiple sources with the following
//! precedence (highest to lowest):
//!
//! 1. Command-line arguments (merged in by the caller, see [`cli`](crate::cli))
//! 2. Environment variables
//! 3. `.focus-validator.toml` in the current directory
//! 4. `~/.config/focus-validator/config.toml`
//! 5. Default values
//!
//! # Configuration File Format
//!
//! ```toml
//! [engine]
//! table_name = "focus_data"
//! dataset = "BillingAccount"
//! stop_on_first_error = false
//!
//! [engine.applicability]
//! active = ["SupportsPublicPriceList"]
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `FOCUS_TABLE_NAME` | Table name the engine validates against |
//! | `FOCUS_DATASET` | Target dataset name |
//! | `FOCUS_RULE_PREFIX` | Restrict validation to rules with this id prefix |
//! | `FOCUS_STOP_ON_FIRST_ERROR` | `"true"`/`"false"` |

use std::{env, fs, path::PathBuf};

use indexmap::IndexSet;
use serde::Deserialize;

use crate::error::{AppResult, config_error};

/// The applicability-tag selection: either every declared tag (`ALL`), or
/// an explicit set.
#[derive(Debug, Clone)]
pub enum ApplicabilitySelection {
    All,
    Tags(IndexSet<String>)
}

impl Default for ApplicabilitySelection {
    fn default() -> Self {
        ApplicabilitySelection::All
    }
}

/// Engine-level run configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_table_name")]
    pub table_name: String,
    pub dataset: Option<String>,
    #[serde(default)]
    pub rule_prefix: Option<String>,
    #[serde(default)]
    pub stop_on_first_error: bool,
    #[serde(default)]
    pub applicability: ApplicabilityConfig
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            table_name: default_table_name(),
            dataset: None,
            rule_prefix: None,
            stop_on_first_error: false,
            applicability: ApplicabilityConfig::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ApplicabilityConfig {
    #[serde(default)]
    pub active: Vec<String>
}

fn default_table_name() -> String {
    "focus_data".to_string()
}

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig
}

impl EngineConfig {
    /// Resolve the configured applicability tags into a selection:
    /// `ALL` expands to every tag the catalog declares, otherwise the
    /// configured set is used verbatim.
    pub fn applicability_selection(&self) -> ApplicabilitySelection {
        if self.applicability.active.is_empty() || self.applicability.active.iter().any(|t| t == "ALL") {
            ApplicabilitySelection::All
        } else {
            ApplicabilitySelection::Tags(self.applicability.active.iter().cloned().collect())
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Config file in current directory (`.focus-validator.toml`)
    /// 3. Config file in home directory (`~/.config/focus-validator/config.toml`)
    /// 4. Default values
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Some(home) = env::var_os("HOME") {
            let home_config = PathBuf::from(home)
                .join(".config")
                .join("focus-validator")
                .join("config.toml");

            if home_config.exists() {
                let content = fs::read_to_string(&home_config)
                    .map_err(|e| config_error(format!("failed to read config file: {e}")))?;
                config = toml::from_str(&content)
                    .map_err(|e| config_error(format!("invalid config file: {e}")))?;
            }
        }

        let local_config = PathBuf::from(".focus-validator.toml");
        if local_config.exists() {
            let content = fs::read_to_string(&local_config)
                .map_err(|e| config_error(format!("failed to read config file: {e}")))?;
            config = toml::from_str(&content)
                .map_err(|e| config_error(format!("invalid config file: {e}")))?;
        }

        if let Ok(table_name) = env::var("FOCUS_TABLE_NAME") {
            config.engine.table_name = table_name;
        }
        if let Ok(dataset) = env::var("FOCUS_DATASET") {
            config.engine.dataset = Some(dataset);
        }
        if let Ok(prefix) = env::var("FOCUS_RULE_PREFIX") {
            config.engine.rule_prefix = Some(prefix);
        }
        if let Ok(stop) = env::var("FOCUS_STOP_ON_FIRST_ERROR") {
            config.engine.stop_on_first_error = stop.eq_ignore_ascii_case("true");
        }

        Ok(config)
    }
}
