use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;
use tokio_modbus::client::Context;
use tracing::{info, warn};

use crate::config::{DeviceConfig, RegisterConfig};
use crate::exporter::Exporter;

use super::control::ControlMessage;
use super::cycle::read_cycle;
use super::state::{CollectorState, store_state};
use super::{connect, reconnect_backoff};

/// Everything the worker task owns; split out of the handle so the handle
/// itself stays `Clone`-free and small.
pub(super) struct CollectorRunner {
    pub(super) id: String,
    pub(super) transport: crate::config::TransportConfig,
    pub(super) unit_id: u8,
    pub(super) registers: Vec<RegisterConfig>,
    pub(super) exporters: Vec<Arc<dyn Exporter>>,
    pub(super) control_rx: mpsc::Receiver<ControlMessage>,
    pub(super) state: Arc<std::sync::atomic::AtomicU8>,
    pub(super) period_ms: Arc<AtomicU64>,
    pub(super) stop_flag: Arc<AtomicBool>,
}

impl CollectorRunner {
    pub(super) fn from_config(
        config: &DeviceConfig,
        exporters: Vec<Arc<dyn Exporter>>,
        control_rx: mpsc::Receiver<ControlMessage>,
        state: Arc<std::sync::atomic::AtomicU8>,
        period_ms: Arc<AtomicU64>,
        stop_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id: config.id.clone(),
            transport: config.transport.clone(),
            unit_id: config.unit_id,
            registers: config.registers.clone(),
            exporters,
            control_rx,
            state,
            period_ms,
            stop_flag,
        }
    }

    fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms.load(Ordering::Acquire).max(1))
    }

    /// Applies one control message to the local `paused` flag and the shared
    /// period/stop state.
    fn apply(&mut self, msg: ControlMessage, paused: &mut bool) {
        match msg {
            ControlMessage::Pause => {
                *paused = true;
                info!("[{}] paused", self.id);
            }
            ControlMessage::Resume => {
                *paused = false;
                info!("[{}] resumed", self.id);
            }
            ControlMessage::SetFrequency(ms) => {
                self.period_ms.store(ms.max(1), Ordering::Release);
                info!("[{}] acquisition period set to {} ms", self.id, ms);
            }
            ControlMessage::Stop => {
                self.stop_flag.store(true, Ordering::Release);
            }
        }
    }

    /// Drains every control message currently queued, applying each in FIFO
    /// order. Returns once the queue is empty (messages enqueued after this
    /// call starts belong to the next drain).
    fn drain_control(&mut self, paused: &mut bool) {
        while let Ok(msg) = self.control_rx.try_recv() {
            self.apply(msg, paused);
        }
    }

    /// Blocks until either the period elapses or a control message / stop
    /// request arrives, whichever comes first — the interruptible idle wait
    /// the cadence and pause/resume scenarios depend on. A message received
    /// here is applied immediately rather than discarded, then the wait
    /// returns without waiting out the rest of the timeout, per §4.4's "any
    /// control message ... returns the worker immediately".
    async fn wait_for(&mut self, timeout: Duration, paused: &mut bool) {
        tokio::select! {
            _ = time::sleep(timeout) => {}
            msg = self.control_rx.recv() => {
                if let Some(msg) = msg {
                    self.apply(msg, paused);
                }
            }
        }
    }

    fn stopped(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    pub(super) async fn run(mut self) {
        store_state(&self.id, &self.state, CollectorState::Connecting);
        let mut paused = false;
        let mut ctx: Option<Context> = None;

        loop {
            self.drain_control(&mut paused);
            if self.stopped() {
                break;
            }

            if paused {
                store_state(&self.id, &self.state, CollectorState::Paused);
                self.wait_for(Duration::from_secs(3600), &mut paused).await;
                continue;
            }

            if ctx.is_none() {
                store_state(&self.id, &self.state, CollectorState::Connecting);
                match connect(&self.transport, self.unit_id).await {
                    Ok(established) => ctx = Some(established),
                    Err(err) => {
                        warn!("[{}] connect failed: {}", self.id, err);
                        self.wait_for(reconnect_backoff(), &mut paused).await;
                        continue;
                    }
                }
            }
            store_state(&self.id, &self.state, CollectorState::Reading);

            let Some(active) = ctx.as_mut() else { continue };
            match read_cycle(&self.id, active, &self.registers).await {
                Ok(Some(record)) => {
                    fan_out(&self.id, &self.exporters, &record).await;
                }
                Ok(None) => {}
                Err(_) => {
                    // connection considered lost; reconnect next iteration
                    ctx = None;
                }
            }

            if self.stopped() {
                break;
            }
            let period = self.period();
            self.wait_for(period, &mut paused).await;
        }

        store_state(&self.id, &self.state, CollectorState::Stopping);
        drop(ctx); // closes the transport handle
        store_state(&self.id, &self.state, CollectorState::Terminated);
    }
}

/// Delivers one record to every connected exporter. Each exporter's `export`
/// call is isolated: an error from one is logged and never affects delivery
/// to the others, and a future per exporter means a slow sink only delays its
/// own delivery, not the cycle bookkeeping for the rest.
async fn fan_out(device_id: &str, exporters: &[Arc<dyn Exporter>], record: &crate::record::TelemetryRecord) {
    let deliveries = exporters.iter().map(|exporter| {
        let exporter = Arc::clone(exporter);
        let record = record.clone();
        let device_id = device_id.to_string();
        async move {
            if !exporter.is_connected().await {
                return;
            }
            if let Err(err) = exporter.export(&record).await {
                warn!("[{}] exporter dispatch failed: {}", device_id, err);
            }
        }
    });
    futures::future::join_all(deliveries).await;
}
