use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Exporter, ExporterError};
use crate::record::TelemetryRecord;

/// Bounded in-process ring buffer. `connect`/`disconnect`/`is_connected` are
/// trivial no-ops — this sink is always "connected".
pub struct MemoryExporter {
    max_size: usize,
    buffer: Mutex<VecDeque<TelemetryRecord>>,
    connected: AtomicBool,
}

impl MemoryExporter {
    pub fn new() -> Self {
        Self {
            max_size: 1000,
            buffer: Mutex::new(VecDeque::new()),
            connected: AtomicBool::new(true),
        }
    }

    /// Returns and clears the buffered records.
    pub async fn flush(&self) -> Vec<TelemetryRecord> {
        let mut guard = self.buffer.lock().await;
        guard.drain(..).collect()
    }

    pub async fn size(&self) -> usize {
        self.buffer.lock().await.len()
    }
}

impl Default for MemoryExporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Exporter for MemoryExporter {
    fn configure(&mut self, config: &serde_json::Value) -> Result<(), ExporterError> {
        if let Some(max_size) = config.get("max_size").and_then(|v| v.as_u64()) {
            self.max_size = max_size as usize;
        }
        Ok(())
    }

    async fn connect(&self) -> Result<(), ExporterError> {
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ExporterError> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn export(&self, record: &TelemetryRecord) -> Result<(), ExporterError> {
        let mut guard = self.buffer.lock().await;
        if guard.len() >= self.max_size {
            guard.pop_front();
        }
        guard.push_back(record.clone());
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn drops_oldest_on_overflow() {
        let mut exporter = MemoryExporter::new();
        exporter.configure(&serde_json::json!({ "max_size": 3 })).unwrap();
        exporter.connect().await.unwrap();

        for i in 0..5u32 {
            let mut values = BTreeMap::new();
            values.insert("n".to_string(), i as f64);
            exporter
                .export(&TelemetryRecord::new("L1", values))
                .await
                .unwrap();
        }

        let buffered = exporter.flush().await;
        assert_eq!(buffered.len(), 3);
        let kept: Vec<f64> = buffered.iter().map(|r| r.values["n"]).collect();
        assert_eq!(kept, vec![2.0, 3.0, 4.0]);
        assert_eq!(exporter.size().await, 0);
    }
}
