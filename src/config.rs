//! ==============================================================================
//! config.rs - Node Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `node.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - DeviceConfig: Identity (device id used in every remote path).
//!     - DatabaseConfig: Realtime database endpoint, secret, connect policy.
//!     - PollingConfig: Sensor sampling cadence and remote AC poll cadence.
//!     - AutomationConfig: Motion hold, inactivity timeout, temperature alarm.
//!     - PinsConfig: GPIO pins and ADC channels.
//!     - ApiConfig: Local status/override HTTP API.
//!
//! ==============================================================================

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that points at an explicit config file.
pub const CONFIG_ENV: &str = "SAFELABS_CONFIG";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub pins: PinsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    pub id: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { id: "sensor_node_01".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    /// e.g. "https://my-project-default-rtdb.firebaseio.com"
    pub url: String,
    /// legacy database secret, appended as `auth=` on every request
    pub secret: String,
    pub timeout_ms: u64,
    pub connect_attempts: u32,
    pub connect_retry_ms: u64,
    /// minimum gap between reconnect probes while offline
    pub reconnect_interval_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            secret: String::new(),
            timeout_ms: 5000,
            connect_attempts: 20,
            connect_retry_ms: 500,
            reconnect_interval_ms: 5000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub sample_interval_ms: u64,
    pub ac_poll_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { sample_interval_ms: 5000, ac_poll_interval_ms: 1000 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AutomationConfig {
    pub motion_hold_secs: u64,
    pub inactivity_timeout_secs: u64,
    pub critical_temp_c: f64,
    pub critical_alert_cooldown_secs: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            motion_hold_secs: 15,
            inactivity_timeout_secs: 15,
            critical_temp_c: 30.0,
            critical_alert_cooldown_secs: 300,
        }
    }
}

impl AutomationConfig {
    pub fn motion_hold(&self) -> Duration {
        Duration::from_secs(self.motion_hold_secs)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn critical_alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.critical_alert_cooldown_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PinsConfig {
    pub dht22: u8,
    pub motion: u8,
    pub ac_led: u8,
    /// MCP3208 channels
    pub gas_channel: u8,
    pub avg_temp_channel: u8,
    pub avg_hum_channel: u8,
}

impl Default for PinsConfig {
    fn default() -> Self {
        Self {
            dht22: 4,
            motion: 27,
            ac_led: 26,
            gas_channel: 0,
            avg_temp_channel: 1,
            avg_hum_channel: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { enabled: true, bind: "0.0.0.0:3000".to_string() }
    }
}

impl NodeConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: NodeConfig = toml::from_str(content).context("Failed to parse config")?;
        if config.device.id.is_empty() {
            anyhow::bail!("device.id must not be empty");
        }
        Ok(config)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let mut paths = Vec::new();
        if let Ok(explicit) = std::env::var(CONFIG_ENV) {
            paths.push(PathBuf::from(explicit));
        }
        paths.push(PathBuf::from("config").join("node.toml"));
        paths.push(PathBuf::from("..").join("config").join("node.toml"));

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {:#}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let database = if self.database.url.is_empty() { "(not configured)" } else { self.database.url.as_str() };
        println!("┌─────────────────────────────────────────┐");
        println!("│           NODE CONFIGURATION            │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Device ID: {}", self.device.id);
        println!("│ Database: {}", database);
        println!("│ Sample Interval: {}ms", self.polling.sample_interval_ms);
        println!("│ AC Poll Interval: {}ms", self.polling.ac_poll_interval_ms);
        println!("│ Motion Hold: {}s", self.automation.motion_hold_secs);
        println!("│ Inactivity Timeout: {}s", self.automation.inactivity_timeout_secs);
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}
