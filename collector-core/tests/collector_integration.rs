//! Exercises the collector worker end to end against a minimal in-process
//! Modbus-TCP (MBAP) server. No pack dependency declares `tokio-modbus`'s
//! `server` feature, so the fake speaks the wire format directly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use collector_core::collector::CollectorHandle;
use collector_core::config::{DeviceConfig, RegisterConfig, RegisterKind, TransportConfig};
use collector_core::exporter::{Exporter, MemoryExporter};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Per-address scripted behaviour for the fake device: a fixed value to
/// return, plus an optional queue of "fail this read" flags consumed one
/// per request (FIFO), for simulating a register that errors on a specific
/// cycle and recovers afterwards.
#[derive(Default)]
struct FakeState {
    holding: HashMap<u16, u16>,
    coils: HashMap<u16, bool>,
    fail_sequence: HashMap<u16, std::collections::VecDeque<bool>>,
}

impl FakeState {
    fn should_fail(&mut self, address: u16) -> bool {
        self.fail_sequence
            .get_mut(&address)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(false)
    }
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<(u16, u8, Vec<u8>)> {
    let mut header = [0u8; 7];
    stream.read_exact(&mut header).await?;
    let tid = u16::from_be_bytes([header[0], header[1]]);
    let len = u16::from_be_bytes([header[4], header[5]]) as usize;
    let unit = header[6];
    let mut pdu = vec![0u8; len.saturating_sub(1)];
    stream.read_exact(&mut pdu).await?;
    Ok((tid, unit, pdu))
}

async fn write_frame(stream: &mut TcpStream, tid: u16, unit: u8, pdu: &[u8]) -> std::io::Result<()> {
    let mut out = Vec::with_capacity(7 + pdu.len());
    out.extend_from_slice(&tid.to_be_bytes());
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
    out.push(unit);
    out.extend_from_slice(pdu);
    stream.write_all(&out).await
}

fn build_response(state: &Mutex<FakeState>, func: u8, addr: u16) -> Vec<u8> {
    let mut guard = state.lock().unwrap();
    if guard.should_fail(addr) {
        return vec![func | 0x80, 0x02];
    }
    match func {
        0x03 | 0x04 => {
            let value = guard.holding.get(&addr).copied().unwrap_or(0);
            let mut pdu = vec![func, 2];
            pdu.extend_from_slice(&value.to_be_bytes());
            pdu
        }
        0x01 | 0x02 => {
            let bit = guard.coils.get(&addr).copied().unwrap_or(false);
            vec![func, 1, if bit { 1 } else { 0 }]
        }
        other => vec![other | 0x80, 0x01],
    }
}

/// Binds a fake Modbus-TCP server on an ephemeral port, serving every
/// connection it accepts (our collector reconnects after a dropped link, so
/// the server must keep accepting rather than exit after the first client).
async fn spawn_fake_server(state: Arc<Mutex<FakeState>>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                loop {
                    match read_frame(&mut stream).await {
                        Ok((tid, unit, pdu)) if pdu.len() >= 5 => {
                            let func = pdu[0];
                            let address = u16::from_be_bytes([pdu[1], pdu[2]]);
                            let response = build_response(&state, func, address);
                            if write_frame(&mut stream, tid, unit, &response).await.is_err() {
                                return;
                            }
                        }
                        _ => return,
                    }
                }
            });
        }
    });
    addr
}

fn memory_exporter() -> (Arc<dyn Exporter>, Arc<MemoryExporter>) {
    let exporter = Arc::new(MemoryExporter::new());
    let handle: Arc<dyn Exporter> = Arc::clone(&exporter) as Arc<dyn Exporter>;
    (handle, exporter)
}

#[tokio::test]
async fn cadence_produces_scaled_records_at_the_configured_period() {
    let mut state = FakeState::default();
    state.holding.insert(0, 5);
    let state = Arc::new(Mutex::new(state));
    let addr = spawn_fake_server(state).await;

    let (exporter_handle, exporter) = memory_exporter();
    exporter_handle.connect().await.unwrap();

    let device = DeviceConfig {
        id: "L1".to_string(),
        transport: TransportConfig::Tcp {
            ip: addr.ip().to_string(),
            port: addr.port(),
        },
        unit_id: 1,
        acquisition_frequency_ms: 50,
        enabled: true,
        registers: vec![RegisterConfig {
            address: 1,
            name: "temp".to_string(),
            kind: RegisterKind::Holding,
            scale: 0.1,
            offset: 2.0,
        }],
    };

    let mut handle = CollectorHandle::spawn(&device, vec![exporter_handle]);
    tokio::time::sleep(Duration::from_millis(550)).await;
    handle.stop_and_join().await;

    let records = exporter.flush().await;
    assert!(
        records.len() >= 6,
        "expected roughly 10 records over 550ms at 50ms cadence, got {}",
        records.len()
    );
    for record in &records {
        assert_eq!(record.device_id, "L1");
        assert_eq!(record.values["temp"], 2.5);
    }
    for pair in records.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

#[tokio::test]
async fn partial_failure_drops_only_the_failing_cycle() {
    let mut state = FakeState::default();
    state.holding.insert(0, 10);
    state.holding.insert(1, 20);
    // Register at address 2 (name "pressure") fails on its third read only.
    state
        .fail_sequence
        .insert(1, [false, false, true, false, false].into_iter().collect());
    let state = Arc::new(Mutex::new(state));
    let addr = spawn_fake_server(state).await;

    let (exporter_handle, exporter) = memory_exporter();
    exporter_handle.connect().await.unwrap();

    let device = DeviceConfig {
        id: "L2".to_string(),
        transport: TransportConfig::Tcp {
            ip: addr.ip().to_string(),
            port: addr.port(),
        },
        unit_id: 1,
        acquisition_frequency_ms: 80,
        enabled: true,
        registers: vec![
            RegisterConfig {
                address: 1,
                name: "temp".to_string(),
                kind: RegisterKind::Holding,
                scale: 1.0,
                offset: 0.0,
            },
            RegisterConfig {
                address: 2,
                name: "pressure".to_string(),
                kind: RegisterKind::Holding,
                scale: 1.0,
                offset: 0.0,
            },
        ],
    };

    let mut handle = CollectorHandle::spawn(&device, vec![exporter_handle]);
    // 5 read attempts at 80ms + reconnect backoff slack on the failing cycle.
    tokio::time::sleep(Duration::from_millis(900)).await;
    handle.stop_and_join().await;

    let records = exporter.flush().await;
    assert!(!records.is_empty());
    for record in &records {
        // Every emitted record has both keys: a failing register never
        // leaves a partial value map behind (§4.4 "DROP the partially
        // built value map").
        assert_eq!(record.values.len(), 2);
        assert_eq!(record.values["temp"], 10.0);
        assert_eq!(record.values["pressure"], 20.0);
    }
}

#[tokio::test]
async fn pause_stops_emission_until_resumed() {
    let mut state = FakeState::default();
    state.holding.insert(0, 7);
    let state = Arc::new(Mutex::new(state));
    let addr = spawn_fake_server(state).await;

    let (exporter_handle, exporter) = memory_exporter();
    exporter_handle.connect().await.unwrap();

    let device = DeviceConfig {
        id: "L3".to_string(),
        transport: TransportConfig::Tcp {
            ip: addr.ip().to_string(),
            port: addr.port(),
        },
        unit_id: 1,
        acquisition_frequency_ms: 30,
        enabled: true,
        registers: vec![RegisterConfig {
            address: 1,
            name: "temp".to_string(),
            kind: RegisterKind::Holding,
            scale: 1.0,
            offset: 0.0,
        }],
    };

    let mut handle = CollectorHandle::spawn(&device, vec![exporter_handle]);
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.pause().await;
    // Let any cycle already in flight when `Pause` was enqueued complete.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let paused_count = exporter.size().await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        exporter.size().await,
        paused_count,
        "no records should be produced while paused"
    );
    handle.resume().await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.stop_and_join().await;

    assert!(exporter.size().await > paused_count, "emission should resume");
}
