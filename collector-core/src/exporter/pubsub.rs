use std::sync::Mutex;

use async_trait::async_trait;

use super::{Exporter, ExporterError};
use crate::record::TelemetryRecord;

/// Publishes each record (legacy schema) as a two-frame ZeroMQ PUB message:
/// the topic, then the JSON body.
pub struct PubsubExporter {
    endpoint: String,
    topic: String,
    socket: Mutex<Option<zmq::Socket>>,
}

impl PubsubExporter {
    pub fn new() -> Self {
        Self {
            endpoint: "tcp://127.0.0.1:5556".to_string(),
            topic: "modbustt".to_string(),
            socket: Mutex::new(None),
        }
    }
}

impl Default for PubsubExporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Exporter for PubsubExporter {
    fn configure(&mut self, config: &serde_json::Value) -> Result<(), ExporterError> {
        if let Some(v) = config.get("endpoint").and_then(|v| v.as_str()) {
            self.endpoint = v.to_string();
        }
        if let Some(v) = config.get("topic").and_then(|v| v.as_str()) {
            self.topic = v.to_string();
        }
        Ok(())
    }

    async fn connect(&self) -> Result<(), ExporterError> {
        let mut guard = self.socket.lock().expect("zmq mutex poisoned");
        if guard.is_some() {
            return Ok(());
        }
        let ctx = zmq::Context::new();
        let socket = ctx
            .socket(zmq::PUB)
            .map_err(|err| ExporterError::Connection(err.to_string()))?;
        socket
            .connect(&self.endpoint)
            .map_err(|err| ExporterError::Connection(err.to_string()))?;
        *guard = Some(socket);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ExporterError> {
        *self.socket.lock().expect("zmq mutex poisoned") = None;
        Ok(())
    }

    async fn export(&self, record: &TelemetryRecord) -> Result<(), ExporterError> {
        let payload = serde_json::to_vec(&record.to_legacy_json())?;
        let guard = self.socket.lock().expect("zmq mutex poisoned");
        match guard.as_ref() {
            Some(socket) => socket
                .send_multipart([self.topic.as_bytes(), &payload], 0)
                .map_err(|err| ExporterError::Connection(err.to_string())),
            None => Err(ExporterError::Connection("pubsub exporter not connected".into())),
        }
    }

    async fn is_connected(&self) -> bool {
        self.socket.lock().expect("zmq mutex poisoned").is_some()
    }
}
