//! Device drivers
//!
//! A driver owns exactly one connection to one device and is not safe for
//! concurrent use: every method takes `&mut self`. Drivers never retry; the
//! [`Gateway`](crate::gateway::Gateway) that owns a driver serializes access
//! to it and applies timeouts and the retry policy.

use crate::config::{DeviceConfig, TransportConfig};
use crate::error::Result;
use crate::request::AddressWindow;

pub mod http;
pub mod modbus;

pub use http::HttpDriver;
pub use modbus::{ModbusDriver, ModbusEndpoint};

/// Untyped data moved across the driver boundary
#[derive(Debug, Clone, PartialEq)]
pub enum RawData {
    Registers(Vec<u16>),
    Json(serde_json::Value),
}

impl RawData {
    pub fn kind(&self) -> &'static str {
        match self {
            RawData::Registers(_) => "registers",
            RawData::Json(_) => "json",
        }
    }
}

/// Capability every transport adapter provides
///
/// Errors must keep "not connected", "timeout" and "malformed response"
/// distinguishable (`GatewayError::NotConnected`, `Timeout`, `Decoding` /
/// `UnknownResponse`) so the gateway can classify them.
#[async_trait::async_trait]
pub trait DeviceDriver: Send {
    /// Transport identifier for logs ("modbus_tcp", "http", ...)
    fn kind(&self) -> &'static str;

    fn is_connected(&self) -> bool;

    /// Whether this transport can address the window at all
    fn supports(&self, window: &AddressWindow) -> bool;

    async fn connect(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    async fn read(&mut self, window: &AddressWindow) -> Result<RawData>;

    async fn write(&mut self, window: &AddressWindow, data: &RawData) -> Result<()>;
}

/// Build the driver variant selected by a device's transport configuration
pub fn build_driver(device: &DeviceConfig) -> Result<Box<dyn DeviceDriver>> {
    match &device.transport {
        TransportConfig::ModbusTcp {
            host,
            port,
            unit_id,
        } => Ok(Box::new(ModbusDriver::new(
            &device.name,
            ModbusEndpoint::Tcp {
                host: host.clone(),
                port: *port,
                unit_id: *unit_id,
            },
        ))),
        TransportConfig::ModbusRtu {
            port,
            baud_rate,
            data_bits,
            stop_bits,
            parity,
            unit_id,
        } => Ok(Box::new(ModbusDriver::new(
            &device.name,
            ModbusEndpoint::Rtu {
                port: port.clone(),
                baud_rate: *baud_rate,
                data_bits: *data_bits,
                stop_bits: *stop_bits,
                parity: parity.clone(),
                unit_id: *unit_id,
            },
        ))),
        TransportConfig::Http {
            base_url,
            timeout_ms,
            headers,
        } => Ok(Box::new(HttpDriver::new(
            &device.name,
            base_url,
            timeout_ms.map(std::time::Duration::from_millis),
            headers,
        )?)),
    }
}
