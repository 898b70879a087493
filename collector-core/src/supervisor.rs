use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::collector::CollectorHandle;
use crate::config::{DeviceConfig, Settings};
use crate::exporter::{Exporter, build_exporter};

/// Owns the set of running collectors keyed by device id, and the shared
/// exporter set every collector is attached to. The sole mutator of the
/// collector map; callers (the command intake) invoke its methods from a
/// single task, so the map itself needs no internal locking.
pub struct Supervisor {
    collectors: HashMap<String, CollectorHandle>,
    exporters: Vec<Arc<dyn Exporter>>,
    settings: Settings,
}

impl Supervisor {
    /// Builds the shared exporter set from `settings.exporters`. An exporter
    /// that fails to configure is logged and dropped from the set rather
    /// than aborting startup — an exporter configuration mistake should not
    /// keep the rest of the process from collecting telemetry.
    pub fn new(settings: Settings) -> Self {
        let mut exporters = Vec::with_capacity(settings.exporters.len());
        for config in &settings.exporters {
            match build_exporter(config) {
                Ok(exporter) => exporters.push(Arc::from(exporter)),
                Err(err) => warn!("failed to configure exporter: {}", err),
            }
        }
        Self {
            collectors: HashMap::new(),
            exporters,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn replace_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    /// Spawns one collector per enabled device in `devices`. Disabled devices
    /// are recorded in the configuration snapshot but never started.
    pub async fn create(&mut self, devices: &[DeviceConfig]) {
        for device in devices {
            if !device.enabled {
                continue;
            }
            self.spawn_one(device);
        }
        self.connect_exporters().await;
    }

    fn spawn_one(&mut self, device: &DeviceConfig) {
        let handle = CollectorHandle::spawn(device, self.exporters.clone());
        self.collectors.insert(device.id.clone(), handle);
    }

    async fn connect_exporters(&self) {
        for exporter in &self.exporters {
            if let Err(err) = exporter.connect().await {
                warn!("exporter connect failed: {}", err);
            }
        }
    }

    fn find_device_config(&self, id: &str) -> Option<&DeviceConfig> {
        self.settings
            .production_lines
            .iter()
            .find(|device| device.id == id)
    }

    pub async fn pause_lines(&self, ids: &[String]) {
        for id in ids {
            match self.collectors.get(id) {
                Some(handle) => handle.pause().await,
                None => warn!("pause_line: unknown device id {}", id),
            }
        }
    }

    pub async fn resume_lines(&self, ids: &[String]) {
        for id in ids {
            match self.collectors.get(id) {
                Some(handle) => handle.resume().await,
                None => warn!("resume_line: unknown device id {}", id),
            }
        }
    }

    pub async fn stop_lines(&mut self, ids: &[String]) {
        for id in ids {
            match self.collectors.get_mut(id) {
                Some(handle) => handle.stop_and_join().await,
                None => warn!("stop_line: unknown device id {}", id),
            }
        }
    }

    pub async fn set_cadence(&self, id: &str, ms: u64) {
        match self.collectors.get(id) {
            Some(handle) => handle.set_frequency(ms).await,
            None => warn!("set_cadence: unknown device id {}", id),
        }
    }

    /// Stops and joins the existing collector (if any), then recreates it
    /// from the device configuration currently in the settings snapshot. If
    /// that configuration is no longer present, the device is logged as a
    /// warning and not recreated.
    pub async fn restart_lines(&mut self, ids: &[String]) {
        for id in ids {
            if let Some(mut handle) = self.collectors.remove(id) {
                handle.stop_and_join().await;
            }
            let Some(device) = self.find_device_config(id).cloned() else {
                warn!("restart_line: no configuration found for device id {}", id);
                continue;
            };
            if !device.enabled {
                warn!("restart_line: device id {} is disabled, not restarting", id);
                continue;
            }
            self.spawn_one(&device);
        }
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.collectors.get(id).is_some_and(CollectorHandle::is_running)
    }

    /// Sends `Stop` to every collector, joins each, clears the map, and
    /// disconnects every exporter. Called once at process shutdown.
    pub async fn shutdown(&mut self) {
        for (_, mut handle) in self.collectors.drain() {
            handle.stop_and_join().await;
        }
        for exporter in &self.exporters {
            if let Err(err) = exporter.disconnect().await {
                warn!("exporter disconnect failed: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MqttSettings, TransportConfig};

    fn settings_with_one_device() -> Settings {
        Settings {
            mqtt: MqttSettings {
                broker: "test".into(),
                port: 1883,
                client_id: "c".into(),
                username: None,
                password: None,
                publish_topic: "supervision/data".into(),
                command_topic: "supervision/commands".into(),
                publish_frequency_ms: 800,
                qos: 1,
            },
            production_lines: vec![DeviceConfig {
                id: "L1".into(),
                transport: TransportConfig::Tcp {
                    ip: "127.0.0.1".into(),
                    port: 15020,
                },
                unit_id: 1,
                acquisition_frequency_ms: 50,
                enabled: true,
                registers: vec![],
            }],
            exporters: vec![],
        }
    }

    #[tokio::test]
    async fn unknown_ids_are_logged_and_skipped() {
        let settings = settings_with_one_device();
        let mut supervisor = Supervisor::new(settings);
        supervisor
            .create(&supervisor.settings().production_lines.clone())
            .await;
        // Unknown id: must not panic.
        supervisor.pause_lines(&["nope".to_string()]).await;
        supervisor.resume_lines(&["nope".to_string()]).await;
        supervisor.set_cadence("nope", 10).await;
        // Give the freshly spawned worker task a real suspension point so it
        // reaches `Connecting` before we read its state; nothing above this
        // line yields on a `current_thread` runtime.
        tokio::task::yield_now().await;
        assert!(supervisor.is_running("L1"));
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn restart_missing_config_does_not_recreate() {
        let settings = settings_with_one_device();
        let mut supervisor = Supervisor::new(settings);
        supervisor.restart_lines(&["unknown-device".to_string()]).await;
        assert!(!supervisor.is_running("unknown-device"));
    }
}
