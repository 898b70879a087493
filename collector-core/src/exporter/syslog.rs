use std::sync::Mutex;

use async_trait::async_trait;
use syslog::{Facility, Formatter3164, Logger, LoggerBackend};

use super::{Exporter, ExporterError};
use crate::record::TelemetryRecord;

/// Emits `collector=<id> name=value name2=value2 ...` at `LOG_INFO` to the
/// local syslog channel.
pub struct SyslogExporter {
    ident: String,
    logger: Mutex<Option<Logger<LoggerBackend, Formatter3164>>>,
}

impl SyslogExporter {
    pub fn new() -> Self {
        Self {
            ident: "modbustt".to_string(),
            logger: Mutex::new(None),
        }
    }
}

impl Default for SyslogExporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Exporter for SyslogExporter {
    fn configure(&mut self, config: &serde_json::Value) -> Result<(), ExporterError> {
        if let Some(v) = config.get("ident").and_then(|v| v.as_str()) {
            self.ident = v.to_string();
        }
        Ok(())
    }

    async fn connect(&self) -> Result<(), ExporterError> {
        let mut guard = self.logger.lock().expect("syslog mutex poisoned");
        if guard.is_some() {
            return Ok(());
        }
        let formatter = Formatter3164 {
            facility: Facility::LOG_USER,
            hostname: None,
            process: self.ident.clone(),
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter)
            .map_err(|err| ExporterError::Connection(err.to_string()))?;
        *guard = Some(logger);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ExporterError> {
        *self.logger.lock().expect("syslog mutex poisoned") = None;
        Ok(())
    }

    async fn export(&self, record: &TelemetryRecord) -> Result<(), ExporterError> {
        let mut message = format!("collector={}", record.device_id);
        for (name, value) in &record.values {
            message.push(' ');
            message.push_str(name);
            message.push('=');
            message.push_str(&value.to_string());
        }
        let mut guard = self.logger.lock().expect("syslog mutex poisoned");
        match guard.as_mut() {
            Some(logger) => {
                if let Err(err) = logger.info(message) {
                    *guard = None;
                    return Err(ExporterError::Connection(err.to_string()));
                }
                Ok(())
            }
            None => Err(ExporterError::Connection("syslog exporter not connected".into())),
        }
    }

    async fn is_connected(&self) -> bool {
        self.logger.lock().expect("syslog mutex poisoned").is_some()
    }
}
