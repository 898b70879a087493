use std::time::Duration;

use tokio::time;
use tokio_modbus::Slave;
use tokio_modbus::client::{Context, rtu, tcp};
use tokio_modbus::prelude::SlaveContext;
use tokio_serial::{DataBits, Parity, StopBits};

use crate::config::{SerialParity, TransportConfig};

use super::error::CollectorError;

/// Modbus response timeout, applied to every connect attempt and every
/// register read.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);
/// Inter-byte timeout for RTU serial reads.
pub const BYTE_TIMEOUT: Duration = Duration::from_millis(500);

pub(super) async fn connect(
    transport: &TransportConfig,
    unit_id: u8,
) -> Result<Context, CollectorError> {
    match transport {
        TransportConfig::Tcp { ip, port } => {
            let addr = format!("{}:{}", ip, port).parse()?;
            let mut ctx = time::timeout(RESPONSE_TIMEOUT, tcp::connect(addr)).await??;
            ctx.set_slave(Slave(unit_id));
            Ok(ctx)
        }
        TransportConfig::Rtu {
            serial_path,
            baud,
            parity,
            data_bits,
            stop_bits,
        } => {
            let mut builder = tokio_serial::new(serial_path.as_str(), *baud);
            builder = builder
                .data_bits(match *data_bits {
                    5 => DataBits::Five,
                    6 => DataBits::Six,
                    7 => DataBits::Seven,
                    _ => DataBits::Eight,
                })
                .parity(match parity {
                    SerialParity::Even => Parity::Even,
                    SerialParity::Odd => Parity::Odd,
                    SerialParity::None => Parity::None,
                })
                .stop_bits(match *stop_bits {
                    2 => StopBits::Two,
                    _ => StopBits::One,
                })
                .timeout(BYTE_TIMEOUT);
            let port = tokio_serial::SerialStream::open(&builder)?;
            let ctx = rtu::attach_slave(port, Slave(unit_id));
            Ok(ctx)
        }
    }
}
