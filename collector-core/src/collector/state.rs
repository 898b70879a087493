use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::info;

/// Collector lifecycle. `Reading` and `Paused` alternate freely; every other
/// transition is one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CollectorState {
    Idle = 0,
    Connecting = 1,
    Reading = 2,
    Paused = 3,
    Stopping = 4,
    Terminated = 5,
}

impl fmt::Display for CollectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CollectorState::Idle => "Idle",
            CollectorState::Connecting => "Connecting",
            CollectorState::Reading => "Reading",
            CollectorState::Paused => "Paused",
            CollectorState::Stopping => "Stopping",
            CollectorState::Terminated => "Terminated",
        };
        write!(f, "{}", label)
    }
}

pub(super) fn load_state(state: &AtomicU8) -> CollectorState {
    match state.load(Ordering::Acquire) {
        0 => CollectorState::Idle,
        1 => CollectorState::Connecting,
        2 => CollectorState::Reading,
        3 => CollectorState::Paused,
        4 => CollectorState::Stopping,
        _ => CollectorState::Terminated,
    }
}

pub(super) fn store_state(id: &str, state: &AtomicU8, to: CollectorState) {
    let from = load_state(state);
    state.store(to as u8, Ordering::Release);
    if from != to {
        info!("[{}] {} -> {}", id, from, to);
    }
}
