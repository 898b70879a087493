use std::collections::BTreeMap;

use tokio::time;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::warn;

use crate::config::{RegisterConfig, RegisterKind};
use crate::record::TelemetryRecord;

use super::connection::RESPONSE_TIMEOUT;
use super::error::CollectorError;

/// Reads every configured register in declaration order. Stops and returns
/// an error at the first failing primitive, per the partial-read policy:
/// the caller drops whatever was read so far rather than emitting a record
/// with missing keys.
pub(super) async fn read_cycle(
    device_id: &str,
    ctx: &mut Context,
    registers: &[RegisterConfig],
) -> Result<Option<TelemetryRecord>, CollectorError> {
    let mut values = BTreeMap::new();
    for register in registers {
        let raw = match read_one(ctx, register).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(
                    "[{}] register {} ({:?}) read failed: {}",
                    device_id, register.address, register.kind, err
                );
                return Err(err);
            }
        };
        values.insert(register.name.clone(), raw * register.scale + register.offset);
    }
    if values.is_empty() {
        return Ok(None);
    }
    Ok(Some(TelemetryRecord::new(device_id, values)))
}

async fn read_one(ctx: &mut Context, register: &RegisterConfig) -> Result<f64, CollectorError> {
    let address = register.address.saturating_sub(1);
    match register.kind {
        RegisterKind::Holding => {
            let words = time::timeout(RESPONSE_TIMEOUT, ctx.read_holding_registers(address, 1))
                .await??
                .map_err(CollectorError::from)?;
            Ok(words[0] as f64)
        }
        RegisterKind::Input => {
            let words = time::timeout(RESPONSE_TIMEOUT, ctx.read_input_registers(address, 1))
                .await??
                .map_err(CollectorError::from)?;
            Ok(words[0] as f64)
        }
        RegisterKind::Coil => {
            let bits = time::timeout(RESPONSE_TIMEOUT, ctx.read_coils(address, 1))
                .await??
                .map_err(CollectorError::from)?;
            Ok(if bits[0] { 1.0 } else { 0.0 })
        }
        RegisterKind::Discrete => {
            let bits = time::timeout(RESPONSE_TIMEOUT, ctx.read_discrete_inputs(address, 1))
                .await??
                .map_err(CollectorError::from)?;
            Ok(if bits[0] { 1.0 } else { 0.0 })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(name: &str, kind: RegisterKind) -> RegisterConfig {
        RegisterConfig {
            address: 1,
            name: name.to_string(),
            kind,
            scale: 0.1,
            offset: 2.0,
        }
    }

    #[test]
    fn scaling_formula_matches_spec() {
        // raw * scale + offset, widened to f64 before the arithmetic.
        let raw = 5.0_f64;
        let register = register("temp", RegisterKind::Holding);
        let scaled = raw * register.scale + register.offset;
        assert_eq!(scaled, 2.5);
    }
}
