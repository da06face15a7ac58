//! Settings file loading
//!
//! An optional TOML file supplies defaults for everything the command line
//! can set. Command-line flags always win.

use anyhow::{Context, Result};
use can_sim_core::SimulatorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Application settings (loaded from settings.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub simulator: SimulatorSettings,
    pub flood: FloodSettings,
    pub metrics: MetricsSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulatorSettings {
    pub interface: String,
    pub dbc: Option<PathBuf>,
    pub cfg: Option<PathBuf>,
    pub asc: Option<PathBuf>,
    #[serde(flatten)]
    pub config: SimulatorConfig,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            interface: "can0".to_string(),
            dbc: None,
            cfg: None,
            asc: None,
            config: SimulatorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FloodSettings {
    /// Default flood parameters, e.g. `["rate=40", "burst-len=500"]`
    pub params: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Metrics file base name, without timestamp and extension
    pub file: Option<String>,
    pub separator: Option<char>,
}

/// Load settings from a TOML file
pub fn load_settings(path: &Path) -> Result<Settings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file: {:?}", path))?;

    let settings: Settings = toml::from_str(&content)
        .with_context(|| format!("Failed to parse settings file: {:?}", path))?;

    Ok(settings)
}
