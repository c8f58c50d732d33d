//! Session configuration with JSON persistence.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::gatt::transport::ScanFilter;
use crate::gatt::uuids;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            console_logging_enabled: default_true(),
            file_logging_enabled: default_false(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "sphygmo".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Service advertised by the monitors to connect to. Overridable for
    /// vendor devices that advertise a custom service.
    #[serde(default = "default_service_uuid")]
    pub service_uuid: String,

    /// Settle time between a scan request and actually starting it.
    #[serde(default = "default_scan_start_delay_ms")]
    pub scan_start_delay_ms: u64,
    /// Pause between reconnection attempts after a link drop.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Deadline for each serialized GATT exchange.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Event-bus buffer depth per subscriber.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            service_uuid: default_service_uuid(),
            scan_start_delay_ms: default_scan_start_delay_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            event_bus_capacity: default_event_bus_capacity(),
            log_settings: LogSettings::default(),
        }
    }
}

fn default_service_uuid() -> String {
    uuids::BLOOD_PRESSURE_SERVICE.to_string()
}
fn default_scan_start_delay_ms() -> u64 {
    1000
}
fn default_reconnect_delay_ms() -> u64 {
    500
}
fn default_command_timeout_ms() -> u64 {
    5000
}
fn default_event_bus_capacity() -> usize {
    64
}

impl SessionConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn scan_start_delay(&self) -> Duration {
        Duration::from_millis(self.scan_start_delay_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Full-mask filter for the configured service. An unparseable
    /// override falls back to the SIG blood-pressure service.
    pub fn scan_filter(&self) -> ScanFilter {
        let service = self.service_uuid.parse().unwrap_or_else(|_| {
            warn!(uuid = %self.service_uuid, "invalid service uuid in config, using default");
            uuids::BLOOD_PRESSURE_SERVICE
        });
        ScanFilter::for_service(service)
    }
}

/// Loads and persists the configuration under the user's config directory.
pub struct ConfigService {
    config: SessionConfig,
    config_path: PathBuf,
}

impl ConfigService {
    pub fn new() -> anyhow::Result<Self> {
        let config_path = Self::config_path()?;
        let config = Self::load_from_file(&config_path).unwrap_or_default();

        Ok(Self {
            config,
            config_path,
        })
    }

    fn config_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("sphygmo");
        fs::create_dir_all(&path)?;
        path.push("config.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<SessionConfig> {
        let contents = fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.config)?;
        fs::write(&self.config_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &SessionConfig {
        &self.config
    }

    pub fn get_mut(&mut self) -> &mut SessionConfig {
        &mut self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: SessionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.command_timeout(), Duration::from_millis(5000));
        assert_eq!(config.scan_start_delay(), Duration::from_millis(1000));
        assert_eq!(config.event_bus_capacity, 64);
        assert_eq!(
            config.scan_filter().service,
            uuids::BLOOD_PRESSURE_SERVICE
        );
    }

    #[test]
    fn bad_service_uuid_falls_back_to_blood_pressure() {
        let config = SessionConfig {
            service_uuid: "not-a-uuid".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.scan_filter().service,
            uuids::BLOOD_PRESSURE_SERVICE
        );
    }

    #[test]
    fn round_trips_through_json() {
        let config = SessionConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.service_uuid, config.service_uuid);
        assert_eq!(back.reconnect_delay_ms, config.reconnect_delay_ms);
    }
}
