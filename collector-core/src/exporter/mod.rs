mod file;
mod memory;
mod mqtt;
mod pubsub;
mod syslog;
mod tcp;

pub use file::FileExporter;
pub use memory::MemoryExporter;
pub use mqtt::MqttExporter;
pub use pubsub::PubsubExporter;
pub use syslog::SyslogExporter;
pub use tcp::TcpExporter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::TelemetryRecord;

#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("exporter configuration error: {0}")]
    Configuration(String),
    #[error("exporter connection error: {0}")]
    Connection(String),
    #[error("exporter io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("exporter serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Uniform sink contract. An exporter may be attached to more than one
/// collector at once (shared by `Arc`); implementations must serialise their
/// own mutable state internally so `export` is safe to call concurrently.
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Applied once before `connect`. Must not perform I/O.
    fn configure(&mut self, config: &serde_json::Value) -> Result<(), ExporterError>;

    /// Idempotent: calling when already connected is a no-op success.
    async fn connect(&self) -> Result<(), ExporterError>;

    /// Idempotent; must release any held OS resource.
    async fn disconnect(&self) -> Result<(), ExporterError>;

    /// Deliver one record. Transient remote errors must be swallowed here and
    /// surfaced only via `is_connected` flipping to false.
    async fn export(&self, record: &TelemetryRecord) -> Result<(), ExporterError>;

    async fn is_connected(&self) -> bool;
}

/// Typed exporter configuration as it appears under the `exporters` key of
/// the application configuration file. Converted to a generic JSON value and
/// handed to the matching exporter's `configure` so each implementation's
/// `configure` follows the contract literally (defaulted keys read from a
/// generic JSON object) rather than depending on this enum's shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExporterConfig {
    File {
        #[serde(default = "default_file_path")]
        filepath: String,
    },
    Memory {
        #[serde(default = "default_max_size")]
        max_size: usize,
    },
    Mqtt {
        #[serde(default = "default_broker_address")]
        broker_address: String,
        #[serde(default = "default_mqtt_port")]
        port: u16,
        #[serde(default = "default_mqtt_client_id")]
        client_id: String,
        #[serde(default = "default_mqtt_topic")]
        topic: String,
        #[serde(default = "default_qos")]
        qos: u8,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
    Tcp {
        #[serde(default = "default_tcp_host")]
        host: String,
        #[serde(default = "default_tcp_port")]
        port: u16,
    },
    Syslog {
        #[serde(default = "default_ident")]
        ident: String,
    },
    Pubsub {
        endpoint: String,
        #[serde(default = "default_pubsub_topic")]
        topic: String,
    },
}

fn default_file_path() -> String {
    "modbustt_output.jsonl".to_string()
}
fn default_max_size() -> usize {
    1000
}
fn default_broker_address() -> String {
    "tcp://localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_mqtt_client_id() -> String {
    "modbustt_exporter".to_string()
}
fn default_mqtt_topic() -> String {
    "modbustt/data".to_string()
}
fn default_qos() -> u8 {
    1
}
fn default_tcp_host() -> String {
    "127.0.0.1".to_string()
}
fn default_tcp_port() -> u16 {
    5170
}
fn default_ident() -> String {
    "modbustt".to_string()
}
fn default_pubsub_topic() -> String {
    "modbustt".to_string()
}

/// Builds and configures the concrete exporter for one configuration entry.
pub fn build_exporter(config: &ExporterConfig) -> Result<Box<dyn Exporter>, ExporterError> {
    let value = serde_json::to_value(config)?;
    let mut exporter: Box<dyn Exporter> = match config {
        ExporterConfig::File { .. } => Box::new(FileExporter::new()),
        ExporterConfig::Memory { .. } => Box::new(MemoryExporter::new()),
        ExporterConfig::Mqtt { .. } => Box::new(MqttExporter::new()),
        ExporterConfig::Tcp { .. } => Box::new(TcpExporter::new()),
        ExporterConfig::Syslog { .. } => Box::new(SyslogExporter::new()),
        ExporterConfig::Pubsub { .. } => Box::new(PubsubExporter::new()),
    };
    exporter.configure(&value)?;
    Ok(exporter)
}
