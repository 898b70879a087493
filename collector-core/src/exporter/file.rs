use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{Exporter, ExporterError};
use crate::record::TelemetryRecord;

/// Appends each record as one JSON-Lines line.
pub struct FileExporter {
    filepath: String,
    file: Arc<Mutex<Option<tokio::fs::File>>>,
}

impl FileExporter {
    pub fn new() -> Self {
        Self {
            filepath: "modbustt_output.jsonl".to_string(),
            file: Arc::new(Mutex::new(None)),
        }
    }
}

impl Default for FileExporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Exporter for FileExporter {
    fn configure(&mut self, config: &serde_json::Value) -> Result<(), ExporterError> {
        if let Some(path) = config.get("filepath").and_then(|v| v.as_str()) {
            self.filepath = path.to_string();
        }
        Ok(())
    }

    async fn connect(&self) -> Result<(), ExporterError> {
        let mut guard = self.file.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.filepath)
            .await?;
        *guard = Some(file);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ExporterError> {
        let mut guard = self.file.lock().await;
        *guard = None;
        Ok(())
    }

    async fn export(&self, record: &TelemetryRecord) -> Result<(), ExporterError> {
        let mut line = serde_json::to_vec(&record.to_primary_json())?;
        line.push(b'\n');
        let mut guard = self.file.lock().await;
        match guard.as_mut() {
            Some(file) => {
                if let Err(err) = file.write_all(&line).await {
                    *guard = None;
                    return Err(ExporterError::Io(err));
                }
                Ok(())
            }
            None => Err(ExporterError::Connection("file sink not connected".into())),
        }
    }

    async fn is_connected(&self) -> bool {
        self.file.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn writes_one_jsonl_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");

        let mut exporter = FileExporter::new();
        exporter
            .configure(&serde_json::json!({ "filepath": path.to_str().unwrap() }))
            .unwrap();
        exporter.connect().await.unwrap();
        assert!(exporter.is_connected().await);

        let mut values = BTreeMap::new();
        values.insert("temp".to_string(), 1.0);
        exporter
            .export(&TelemetryRecord::new("L1", values.clone()))
            .await
            .unwrap();
        exporter
            .export(&TelemetryRecord::new("L1", values))
            .await
            .unwrap();
        exporter.disconnect().await.unwrap();
        assert!(!exporter.is_connected().await);

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
        for line in contents.lines() {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(parsed["collector_id"], "L1");
        }
    }
}
