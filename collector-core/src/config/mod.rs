use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Deserialize;
use tokio::fs;

use crate::exporter::ExporterConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("duplicate device id: {0}")]
    DuplicateDeviceId(String),
    #[error("device {device}: duplicate register name: {name}")]
    DuplicateRegisterName { device: String, name: String },
    #[error("device {device}: unit id {value} out of range 1..=247")]
    InvalidUnitId { device: String, value: u8 },
}

/// Top-level, typed snapshot of the application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub production_lines: Vec<DeviceConfig>,
    #[serde(default)]
    pub exporters: Vec<ExporterConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttSettings {
    pub broker: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_publish_topic")]
    pub publish_topic: String,
    #[serde(default = "default_command_topic")]
    pub command_topic: String,
    #[serde(default = "default_publish_frequency_ms")]
    pub publish_frequency_ms: u64,
    #[serde(default = "default_qos")]
    pub qos: u8,
}

fn default_mqtt_port() -> u16 {
    1883
}
fn default_publish_topic() -> String {
    "supervision/data".to_string()
}
fn default_command_topic() -> String {
    "supervision/commands".to_string()
}
fn default_publish_frequency_ms() -> u64 {
    800
}
fn default_qos() -> u8 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    #[serde(flatten)]
    pub transport: TransportConfig,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default = "default_acquisition_frequency_ms")]
    pub acquisition_frequency_ms: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub registers: Vec<RegisterConfig>,
}

fn default_unit_id() -> u8 {
    1
}
fn default_acquisition_frequency_ms() -> u64 {
    200
}
fn default_enabled() -> bool {
    true
}

/// A device either speaks Modbus TCP (`ip`/`port`) or Modbus RTU
/// (`serial_path`/`baud`/...). The fields are disjoint, so an untagged enum
/// distinguishes them from a flat YAML mapping without an explicit tag key.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TransportConfig {
    Tcp {
        ip: String,
        #[serde(default = "default_modbus_port")]
        port: u16,
    },
    Rtu {
        serial_path: String,
        baud: u32,
        #[serde(default)]
        parity: SerialParity,
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
}

fn default_modbus_port() -> u16 {
    502
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    #[default]
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterConfig {
    pub address: u16,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RegisterKind,
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    Holding,
    Input,
    Coil,
    Discrete,
}

fn validate(settings: &Settings) -> Result<(), ConfigError> {
    let mut seen_ids = std::collections::HashSet::new();
    for device in &settings.production_lines {
        if !seen_ids.insert(device.id.as_str()) {
            return Err(ConfigError::DuplicateDeviceId(device.id.clone()));
        }
        if device.unit_id == 0 {
            return Err(ConfigError::InvalidUnitId {
                device: device.id.clone(),
                value: device.unit_id,
            });
        }
        let mut seen_names = std::collections::HashSet::new();
        for register in &device.registers {
            if !seen_names.insert(register.name.as_str()) {
                return Err(ConfigError::DuplicateRegisterName {
                    device: device.id.clone(),
                    name: register.name.clone(),
                });
            }
        }
    }
    Ok(())
}

async fn read_and_parse(path: &Path) -> Result<Settings, ConfigError> {
    let mut bytes = fs::read(path).await?;
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        bytes.drain(..3);
    }
    while matches!(bytes.first(), Some(b' ' | b'\n' | b'\r' | b'\t')) {
        bytes.drain(..1);
    }
    let settings: Settings = serde_yml::from_slice(&bytes)?;
    validate(&settings)?;
    Ok(settings)
}

/// Loads a YAML configuration file and tracks its mtime so callers can poll
/// for external edits. Reloading replaces the in-memory snapshot; it does
/// NOT reconcile already-running collectors (see the supervisor).
pub struct ConfigSource {
    path: PathBuf,
    last_mtime: Option<SystemTime>,
    settings: Settings,
}

impl ConfigSource {
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let settings = read_and_parse(&path).await?;
        let last_mtime = fs::metadata(&path).await.ok().and_then(|m| m.modified().ok());
        Ok(Self {
            path,
            last_mtime,
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn has_changed(&self) -> bool {
        let Ok(metadata) = fs::metadata(&self.path).await else {
            return false;
        };
        let Ok(modified) = metadata.modified() else {
            return false;
        };
        match self.last_mtime {
            Some(last) => modified > last,
            None => true,
        }
    }

    pub async fn reload(&mut self) -> Result<(), ConfigError> {
        self.settings = read_and_parse(&self.path).await?;
        self.last_mtime = fs::metadata(&self.path).await.ok().and_then(|m| m.modified().ok());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
mqtt:
  broker: test-broker
  client_id: collector-test
production_lines:
  - id: L1
    ip: 10.0.0.5
    registers:
      - { address: 1, name: temp, type: holding, scale: 0.1, offset: 2.0 }
  - id: L2
    serial_path: /dev/ttyUSB0
    baud: 9600
    registers: []
"#;

    #[tokio::test]
    async fn parses_defaults_and_transport_variants() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        tokio::fs::write(&path, SAMPLE).await.unwrap();

        let source = ConfigSource::load(&path).await.unwrap();
        let settings = source.settings();
        assert_eq!(settings.mqtt.port, 1883);
        assert_eq!(settings.mqtt.publish_topic, "supervision/data");
        assert_eq!(settings.production_lines.len(), 2);

        let l1 = &settings.production_lines[0];
        assert_eq!(l1.unit_id, 1);
        assert_eq!(l1.acquisition_frequency_ms, 200);
        match &l1.transport {
            TransportConfig::Tcp { ip, port } => {
                assert_eq!(ip, "10.0.0.5");
                assert_eq!(*port, 502);
            }
            TransportConfig::Rtu { .. } => panic!("expected tcp transport"),
        }

        let l2 = &settings.production_lines[1];
        match &l2.transport {
            TransportConfig::Rtu {
                serial_path, baud, ..
            } => {
                assert_eq!(serial_path, "/dev/ttyUSB0");
                assert_eq!(*baud, 9600);
            }
            TransportConfig::Tcp { .. } => panic!("expected rtu transport"),
        }
    }

    #[tokio::test]
    async fn rejects_duplicate_device_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let yaml = r#"
mqtt:
  broker: b
  client_id: c
production_lines:
  - { id: L1, ip: 10.0.0.1, registers: [] }
  - { id: L1, ip: 10.0.0.2, registers: [] }
"#;
        tokio::fs::write(&path, yaml).await.unwrap();
        let err = ConfigSource::load(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateDeviceId(id) if id == "L1"));
    }

    #[tokio::test]
    async fn has_changed_detects_mtime_bump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        tokio::fs::write(&path, SAMPLE).await.unwrap();
        let source = ConfigSource::load(&path).await.unwrap();
        assert!(!source.has_changed().await);

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        tokio::fs::write(&path, SAMPLE).await.unwrap();
        assert!(source.has_changed().await);
    }
}
