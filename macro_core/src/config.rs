//! Configuration file support for plan macros.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/plan-macros/config.toml`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub patching: PatchingConfig,

    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
        }
    }
}

/// Bounds applied when patches are generated
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatchingConfig {
    /// Upper clamp for planned intensity (% of 1RM)
    #[serde(default = "default_intensity_ceiling")]
    pub intensity_ceiling: f64,

    #[serde(default = "default_min_reps")]
    pub min_reps: i64,

    /// Largest set-count change one `Adjust_Sets` action may request
    #[serde(default = "default_max_set_delta")]
    pub max_set_delta: u32,
}

impl Default for PatchingConfig {
    fn default() -> Self {
        Self {
            intensity_ceiling: default_intensity_ceiling(),
            min_reps: default_min_reps(),
            max_set_delta: default_max_set_delta(),
        }
    }
}

/// Which set wins when several share the best e1RM in a workout
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    Earliest,
    Latest,
}

/// Trigger evaluation parameters
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct EvaluationConfig {
    #[serde(default)]
    pub e1rm_tie_break: TieBreak,
}

// Default value functions
fn default_store_path() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("plan-macros").join("store.json")
}

fn default_intensity_ceiling() -> f64 {
    110.0
}

fn default_min_reps() -> i64 {
    1
}

fn default_max_set_delta() -> u32 {
    10
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("plan-macros").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let ceiling = self.patching.intensity_ceiling;
        if ceiling.is_nan() || ceiling <= 0.0 {
            return Err(Error::Config(format!(
                "intensity_ceiling must be positive, got {}",
                self.patching.intensity_ceiling
            )));
        }
        if self.patching.min_reps < 1 {
            return Err(Error::Config(format!(
                "min_reps must be at least 1, got {}",
                self.patching.min_reps
            )));
        }
        if self.patching.max_set_delta < 1 {
            return Err(Error::Config("max_set_delta must be at least 1".into()));
        }
        Ok(())
    }
}
