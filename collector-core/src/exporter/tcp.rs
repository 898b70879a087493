use std::net::{Ipv4Addr, SocketAddrV4};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::{Exporter, ExporterError};
use crate::record::TelemetryRecord;

/// Raw newline-delimited JSON over a TCP stream. On write error the socket
/// is closed and `is_connected` becomes false; no auto-reconnect.
pub struct TcpExporter {
    host: String,
    port: u16,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpExporter {
    pub fn new() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5170,
            stream: Mutex::new(None),
        }
    }
}

impl Default for TcpExporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Exporter for TcpExporter {
    fn configure(&mut self, config: &serde_json::Value) -> Result<(), ExporterError> {
        if let Some(v) = config.get("host").and_then(|v| v.as_str()) {
            self.host = v.to_string();
        }
        if let Some(v) = config.get("port").and_then(|v| v.as_u64()) {
            self.port = v as u16;
        }
        Ok(())
    }

    async fn connect(&self) -> Result<(), ExporterError> {
        let mut guard = self.stream.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        // An explicit IPv4 stream socket per §4.3, rather than handing `host`
        // to `ToSocketAddrs` and letting generic resolution pick an IPv6
        // address.
        let ip: Ipv4Addr = self
            .host
            .parse()
            .map_err(|_| ExporterError::Configuration(format!("tcp exporter host {} is not an IPv4 address", self.host)))?;
        let addr = SocketAddrV4::new(ip, self.port);
        let stream = TcpStream::connect(addr).await?;
        *guard = Some(stream);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ExporterError> {
        *self.stream.lock().await = None;
        Ok(())
    }

    async fn export(&self, record: &TelemetryRecord) -> Result<(), ExporterError> {
        let mut line = serde_json::to_vec(&record.to_primary_json())?;
        line.push(b'\n');
        let mut guard = self.stream.lock().await;
        match guard.as_mut() {
            Some(stream) => {
                if let Err(err) = stream.write_all(&line).await {
                    *guard = None;
                    return Err(ExporterError::Io(err));
                }
                Ok(())
            }
            None => Err(ExporterError::Connection("tcp exporter not connected".into())),
        }
    }

    async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }
}
