//! Modbus TCP/RTU driver
//!
//! Wraps a single `tokio-modbus` client context. Transport errors drop the
//! context so the driver reports itself disconnected and the next attempt
//! starts from a fresh connection.

use super::{DeviceDriver, RawData};
use crate::error::{GatewayError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::request::{AddressWindow, RegisterBank};
use tokio_modbus::ExceptionCode;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

/// Where a Modbus device lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusEndpoint {
    Tcp {
        host: String,
        port: u16,
        unit_id: u8,
    },
    Rtu {
        port: String,
        baud_rate: u32,
        data_bits: u8,
        stop_bits: u8,
        parity: String,
        unit_id: u8,
    },
}

impl ModbusEndpoint {
    fn describe(&self) -> String {
        match self {
            ModbusEndpoint::Tcp {
                host,
                port,
                unit_id,
            } => format!("tcp://{}:{} unit {}", host, port, unit_id),
            ModbusEndpoint::Rtu {
                port,
                baud_rate,
                unit_id,
                ..
            } => format!("rtu://{}@{} unit {}", port, baud_rate, unit_id),
        }
    }
}

/// Modbus client for one device
pub struct ModbusDriver {
    /// Modbus client connection
    client: Option<Context>,

    endpoint: ModbusEndpoint,

    logger: StructuredLogger,
}

impl ModbusDriver {
    /// Create a new, disconnected driver
    pub fn new(device: &str, endpoint: ModbusEndpoint) -> Self {
        let logger = get_logger_with_context(LogContext::new("modbus").with_device(device));
        Self {
            client: None,
            endpoint,
            logger,
        }
    }

    pub fn endpoint(&self) -> &ModbusEndpoint {
        &self.endpoint
    }

    /// Get client reference or error if not connected
    fn get_client(&mut self) -> Result<&mut Context> {
        self.client
            .as_mut()
            .ok_or_else(|| GatewayError::not_connected("Not connected to Modbus server"))
    }

    /// Unwrap a tokio-modbus response, dropping the connection on transport failures
    fn settle<T>(
        &mut self,
        op: &str,
        response: std::result::Result<std::result::Result<T, ExceptionCode>, tokio_modbus::Error>,
    ) -> Result<T> {
        match response {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(code)) => {
                let err = exception_error(op, code);
                self.logger.warn(&err.to_string());
                Err(err)
            }
            Err(tokio_modbus::Error::Transport(io)) => {
                self.logger
                    .error(&format!("Transport error during {}: {}", op, io));
                self.client = None;
                Err(match GatewayError::from(io) {
                    e if e.is_transient() => e,
                    other => GatewayError::connection(other.to_string()),
                })
            }
            Err(tokio_modbus::Error::Protocol(p)) => {
                self.logger
                    .error(&format!("Protocol error during {}: {}", op, p));
                self.client = None;
                Err(GatewayError::unknown_response(format!(
                    "Unexpected Modbus response to {}: {}",
                    op, p
                )))
            }
        }
    }
}

/// Open a fresh client context for an endpoint
async fn open(endpoint: ModbusEndpoint) -> Result<Context> {
    match &endpoint {
        ModbusEndpoint::Tcp {
            host,
            port,
            unit_id,
        } => {
            let address = format!("{}:{}", host, port);
            let socket_addr = tokio::net::lookup_host(&address)
                .await
                .map_err(|e| {
                    GatewayError::not_connected(format!("Cannot resolve {}: {}", address, e))
                })?
                .next()
                .ok_or_else(|| {
                    GatewayError::not_connected(format!("No address found for {}", address))
                })?;
            tcp::connect_slave(socket_addr, Slave(*unit_id))
                .await
                .map_err(|e| {
                    GatewayError::not_connected(format!(
                        "Failed to connect to Modbus server at {}: {}",
                        socket_addr, e
                    ))
                })
        }
        ModbusEndpoint::Rtu {
            port,
            baud_rate,
            data_bits,
            stop_bits,
            parity,
            unit_id,
        } => open_serial(port, *baud_rate, *data_bits, *stop_bits, parity, *unit_id),
    }
}

/// Map a Modbus exception to the gateway taxonomy
pub fn exception_error(op: &str, code: ExceptionCode) -> GatewayError {
    match code {
        ExceptionCode::ServerDeviceBusy
        | ExceptionCode::Acknowledge
        | ExceptionCode::GatewayPathUnavailable
        | ExceptionCode::GatewayTargetDevice => {
            GatewayError::unavailable(format!("Modbus exception on {}: {:?}", op, code))
        }
        other => GatewayError::device_fault(format!("Modbus exception on {}: {:?}", op, other)),
    }
}

#[cfg(feature = "rtu")]
fn open_serial(
    port: &str,
    baud_rate: u32,
    data_bits: u8,
    stop_bits: u8,
    parity: &str,
    unit_id: u8,
) -> Result<Context> {
    use tokio_serial::{DataBits, Parity, SerialPortBuilderExt, StopBits};

    let data_bits = match data_bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    };
    let stop_bits = if stop_bits == 2 {
        StopBits::Two
    } else {
        StopBits::One
    };
    let parity = match parity.to_ascii_lowercase().as_str() {
        "odd" => Parity::Odd,
        "even" => Parity::Even,
        _ => Parity::None,
    };
    let stream = tokio_serial::new(port, baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .open_native_async()
        .map_err(|e| {
            GatewayError::not_connected(format!("Failed to open serial port {}: {}", port, e))
        })?;
    Ok(rtu::attach_slave(stream, Slave(unit_id)))
}

#[cfg(not(feature = "rtu"))]
fn open_serial(
    port: &str,
    _baud_rate: u32,
    _data_bits: u8,
    _stop_bits: u8,
    _parity: &str,
    _unit_id: u8,
) -> Result<Context> {
    Err(GatewayError::config(format!(
        "Serial port {} requested but devgate was built without the 'rtu' feature",
        port
    )))
}

#[async_trait::async_trait]
impl DeviceDriver for ModbusDriver {
    fn kind(&self) -> &'static str {
        match self.endpoint {
            ModbusEndpoint::Tcp { .. } => "modbus_tcp",
            ModbusEndpoint::Rtu { .. } => "modbus_rtu",
        }
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn supports(&self, window: &AddressWindow) -> bool {
        matches!(window, AddressWindow::Registers { .. })
    }

    async fn connect(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }
        let target = self.endpoint.describe();
        self.logger
            .info(&format!("Connecting to Modbus device at {}", target));
        match open(self.endpoint.clone()).await {
            Ok(ctx) => {
                self.client = Some(ctx);
                self.logger.info("Successfully connected to Modbus device");
                Ok(())
            }
            Err(e) => {
                self.logger.error(&e.to_string());
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut client) = self.client.take() {
            self.logger.info("Disconnecting from Modbus device");
            if let Err(e) = client.disconnect().await {
                self.logger
                    .debug(&format!("Ignoring error while disconnecting: {}", e));
            }
        }
        Ok(())
    }

    async fn read(&mut self, window: &AddressWindow) -> Result<RawData> {
        let AddressWindow::Registers {
            bank,
            offset,
            count,
        } = window
        else {
            return Err(GatewayError::invalid_request(
                "Modbus devices are addressed by register windows",
            ));
        };
        let (bank, offset, count) = (*bank, *offset, *count);

        self.logger
            .debug(&format!("Reading {} {:?} registers from {}", count, bank, offset));

        let client = self.get_client()?;
        let response = match bank {
            RegisterBank::Holding => client.read_holding_registers(offset, count).await,
            RegisterBank::Input => client.read_input_registers(offset, count).await,
        };
        let registers = self.settle("read", response)?;

        if registers.len() != usize::from(count) {
            return Err(GatewayError::unknown_response(format!(
                "Asked for {} registers, device returned {}",
                count,
                registers.len()
            )));
        }
        self.logger
            .trace(&format!("Read {} registers: {:?}", registers.len(), registers));
        Ok(RawData::Registers(registers))
    }

    async fn write(&mut self, window: &AddressWindow, data: &RawData) -> Result<()> {
        let (AddressWindow::Registers { offset, count, .. }, RawData::Registers(values)) =
            (window, data)
        else {
            return Err(GatewayError::invalid_request(
                "Modbus writes need a register window and register values",
            ));
        };
        if values.len() != usize::from(*count) {
            return Err(GatewayError::invalid_request(format!(
                "Window holds {} registers but {} values were given",
                count,
                values.len()
            )));
        }

        self.logger.debug(&format!(
            "Writing {} values to registers starting at {}",
            values.len(),
            offset
        ));

        let offset = *offset;
        let client = self.get_client()?;
        let response = if values.len() == 1 {
            client.write_single_register(offset, values[0]).await
        } else {
            client.write_multiple_registers(offset, values).await
        };
        self.settle("write", response)
    }
}
