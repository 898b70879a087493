use std::net::AddrParseError;

use tokio_modbus::{Error as ModbusError, ExceptionCode};

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("address parse error: {0}")]
    AddrParse(#[from] AddrParseError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timeout")]
    Elapsed(#[from] tokio::time::error::Elapsed),
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
    #[error("modbus error: {0}")]
    Modbus(#[from] ModbusError),
    #[error("modbus exception: {0:?}")]
    ModbusException(ExceptionCode),
}

impl From<ExceptionCode> for CollectorError {
    fn from(value: ExceptionCode) -> Self {
        CollectorError::ModbusException(value)
    }
}
