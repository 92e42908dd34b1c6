//! Host configuration module
//!
//! Parses the field host's configuration from YAML. Every field except the
//! node name has a default, so a minimal file is one line long.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Highest channel id a host may serve
pub const CHANNEL_MAX: i32 = 39;

/// Field host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    // ============================================
    // Node Identity
    // ============================================
    /// Name this host reports in logs
    pub node_name: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub world_id: i32,

    #[serde(default)]
    pub channel_id: i32,

    // ============================================
    // Simulation
    // ============================================
    /// How often the tick driver visits every field, in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Minimum seconds between two generator evaluations of a field
    #[serde(default = "default_gen_interval_secs")]
    pub gen_interval_secs: u64,

    /// Fixed seed for generator selection (tests and replays)
    #[serde(default)]
    pub rng_seed: Option<u64>,

    // ============================================
    // Data
    // ============================================
    /// Template catalog file
    #[serde(default = "default_templates")]
    pub templates: String,

    /// Fields to host; empty means every field in the catalog
    #[serde(default)]
    pub fields: Vec<u32>,
}

// ============================================
// Default value functions
// ============================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8585
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_gen_interval_secs() -> u64 {
    7
}

fn default_templates() -> String {
    "./data/fields.yaml".to_string()
}

impl HostConfig {
    /// Load configuration from a YAML file
    ///
    /// # Example
    /// ```no_run
    /// use fieldcore::config::HostConfig;
    ///
    /// let config = HostConfig::from_file("conf/host.yaml")
    ///     .expect("Failed to load config");
    /// println!("Node: {}", config.node_name);
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: HostConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML in {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from a YAML string
    pub fn from_str(contents: &str) -> Result<Self> {
        let config: HostConfig = serde_yaml::from_str(contents)
            .context("Failed to parse YAML")?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.node_name.is_empty(), "node_name cannot be empty");
        anyhow::ensure!(!self.templates.is_empty(), "templates cannot be empty");
        anyhow::ensure!(
            (0..=CHANNEL_MAX).contains(&self.channel_id),
            "channel_id out of range: {} (max {})",
            self.channel_id,
            CHANNEL_MAX
        );
        anyhow::ensure!(self.tick_interval_ms > 0, "tick_interval_ms must be positive");
        anyhow::ensure!(
            self.gen_interval_secs >= 1,
            "gen_interval_secs must be at least 1"
        );
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn gen_interval(&self) -> Duration {
        Duration::from_secs(self.gen_interval_secs)
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(&self)
            .context("Failed to serialize config to YAML")?;

        fs::write(path.as_ref(), yaml)
            .with_context(|| format!("Failed to write config to {}", path.as_ref().display()))?;

        Ok(())
    }
}
