mod connection;
mod control;
mod cycle;
mod error;
mod runner;
mod state;

pub use control::ControlMessage;
pub use error::CollectorError;
pub use state::CollectorState;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::DeviceConfig;
use crate::exporter::Exporter;

use connection::connect;

/// Connect backoff after a failed attempt (§4.4 main loop step 3).
fn reconnect_backoff() -> Duration {
    Duration::from_secs(5)
}

/// Control-queue depth. Generous: the worker drains the whole queue before
/// every cycle decision, so this only bounds how many commands can be
/// in flight before a sender would have to wait.
const CONTROL_CHANNEL_CAPACITY: usize = 32;

/// The Supervisor's handle onto one running (or stopped) collector task. The
/// handle owns the control-message sender and the shared atomics the worker
/// task reads; the worker task itself owns the transport and exporter list.
pub struct CollectorHandle {
    id: String,
    control_tx: mpsc::Sender<ControlMessage>,
    state: Arc<AtomicU8>,
    period_ms: Arc<AtomicU64>,
    stop_flag: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl CollectorHandle {
    /// Builds a collector for `config` sharing `exporters`, and spawns its
    /// worker task. The returned handle is immediately `Reading` (or
    /// `Connecting`, depending on scheduling) — there is no separate `start`
    /// step; construction and starting are the same operation, matching the
    /// Supervisor's `create` contract.
    pub fn spawn(config: &DeviceConfig, exporters: Vec<Arc<dyn Exporter>>) -> Self {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let state = Arc::new(AtomicU8::new(CollectorState::Idle as u8));
        let period_ms = Arc::new(AtomicU64::new(config.acquisition_frequency_ms.max(1)));
        let stop_flag = Arc::new(AtomicBool::new(false));

        let worker = runner::CollectorRunner::from_config(
            config,
            exporters,
            control_rx,
            Arc::clone(&state),
            Arc::clone(&period_ms),
            Arc::clone(&stop_flag),
        );
        let task = tokio::spawn(worker.run());

        Self {
            id: config.id.clone(),
            control_tx,
            state,
            period_ms,
            stop_flag,
            task: Some(task),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> CollectorState {
        state::load_state(&self.state)
    }

    pub fn is_running(&self) -> bool {
        !matches!(
            self.state(),
            CollectorState::Idle | CollectorState::Stopping | CollectorState::Terminated
        )
    }

    pub fn current_period_ms(&self) -> u64 {
        self.period_ms.load(Ordering::Acquire)
    }

    async fn send(&self, msg: ControlMessage) {
        if self.control_tx.send(msg).await.is_err() {
            warn!("[{}] control channel closed; worker already exited", self.id);
        }
    }

    pub async fn pause(&self) {
        self.send(ControlMessage::Pause).await;
    }

    pub async fn resume(&self) {
        self.send(ControlMessage::Resume).await;
    }

    pub async fn set_frequency(&self, ms: u64) {
        self.send(ControlMessage::SetFrequency(ms)).await;
    }

    /// Sends `Stop` but does not wait for the worker to exit; use
    /// [`CollectorHandle::stop_and_join`] for that.
    pub async fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        self.send(ControlMessage::Stop).await;
    }

    /// Sends `Stop` and awaits the worker task, with a grace period beyond
    /// which the task is aborted rather than waited on indefinitely (a
    /// misbehaving Modbus stack blocked past its own timeouts should not wedge
    /// the Supervisor).
    pub async fn stop_and_join(&mut self) {
        self.stop().await;
        if let Some(mut task) = self.task.take() {
            tokio::select! {
                res = &mut task => {
                    if let Err(err) = res {
                        warn!("[{}] collector task panicked: {}", self.id, err);
                    }
                }
                _ = tokio::time::sleep(Duration::from_secs(3)) => {
                    warn!("[{}] collector task did not exit within grace period; aborting", self.id);
                    task.abort();
                }
            }
        }
    }
}
