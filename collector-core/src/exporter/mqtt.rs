use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

use super::{Exporter, ExporterError};
use crate::record::TelemetryRecord;

fn qos_from(value: u8) -> QoS {
    match value {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// Publishes every record (legacy schema) to a broker topic. Keep-alive 20 s,
/// clean session. Does not auto-reconnect once the session is lost: the
/// caller must invoke `connect` again.
pub struct MqttExporter {
    broker_address: String,
    port: u16,
    client_id: String,
    topic: String,
    qos: QoS,
    username: Option<String>,
    password: Option<String>,
    client: Mutex<Option<AsyncClient>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
}

impl MqttExporter {
    pub fn new() -> Self {
        Self {
            broker_address: "tcp://localhost".to_string(),
            port: 1883,
            client_id: "modbustt_exporter".to_string(),
            topic: "modbustt/data".to_string(),
            qos: QoS::AtLeastOnce,
            username: None,
            password: None,
            client: Mutex::new(None),
            poller: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    fn host(&self) -> &str {
        self.broker_address
            .trim_start_matches("tcp://")
            .trim_start_matches("mqtt://")
    }
}

impl Default for MqttExporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Exporter for MqttExporter {
    fn configure(&mut self, config: &serde_json::Value) -> Result<(), ExporterError> {
        if let Some(v) = config.get("broker_address").and_then(|v| v.as_str()) {
            self.broker_address = v.to_string();
        }
        if let Some(v) = config.get("port").and_then(|v| v.as_u64()) {
            self.port = v as u16;
        }
        if let Some(v) = config.get("client_id").and_then(|v| v.as_str()) {
            self.client_id = v.to_string();
        }
        if let Some(v) = config.get("topic").and_then(|v| v.as_str()) {
            self.topic = v.to_string();
        }
        if let Some(v) = config.get("qos").and_then(|v| v.as_u64()) {
            self.qos = qos_from(v as u8);
        }
        if let Some(v) = config.get("username").and_then(|v| v.as_str()) {
            self.username = Some(v.to_string());
        }
        if let Some(v) = config.get("password").and_then(|v| v.as_str()) {
            self.password = Some(v.to_string());
        }
        Ok(())
    }

    async fn connect(&self) -> Result<(), ExporterError> {
        if self.client.lock().await.is_some() {
            return Ok(());
        }
        let mut options = MqttOptions::new(self.client_id.clone(), self.host(), self.port);
        options.set_keep_alive(Duration::from_secs(20));
        options.set_clean_session(true);
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            options.set_credentials(user.clone(), pass.clone());
        }
        let (client, mut event_loop) = AsyncClient::new(options, 64);
        let connected = Arc::clone(&self.connected);
        let handle = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        connected.store(true, Ordering::Release);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("mqtt exporter connection lost: {}", err);
                        connected.store(false, Ordering::Release);
                        return;
                    }
                }
            }
        });
        *self.poller.lock().await = Some(handle);
        *self.client.lock().await = Some(client);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ExporterError> {
        if let Some(client) = self.client.lock().await.take() {
            let _ = client.disconnect().await;
        }
        if let Some(handle) = self.poller.lock().await.take() {
            handle.abort();
        }
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn export(&self, record: &TelemetryRecord) -> Result<(), ExporterError> {
        let guard = self.client.lock().await;
        let Some(client) = guard.as_ref() else {
            return Err(ExporterError::Connection("mqtt exporter not connected".into()));
        };
        let payload = serde_json::to_vec(&record.to_legacy_json())?;
        if let Err(err) = client.publish(&self.topic, self.qos, false, payload).await {
            self.connected.store(false, Ordering::Release);
            return Err(ExporterError::Connection(err.to_string()));
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
