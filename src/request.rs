//! Operation requests and address windows

use crate::codec::Value;
use crate::error::{GatewayError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Modbus register table addressed by a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegisterBank {
    #[default]
    Holding,
    /// Read-only input registers
    Input,
}

/// Contiguous, device-resident data targeted by one request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AddressWindow {
    Registers {
        bank: RegisterBank,
        offset: u16,
        count: u16,
    },
    Endpoint {
        path: String,
    },
}

impl AddressWindow {
    pub fn holding(offset: u16, count: u16) -> Self {
        AddressWindow::Registers {
            bank: RegisterBank::Holding,
            offset,
            count,
        }
    }

    pub fn input(offset: u16, count: u16) -> Self {
        AddressWindow::Registers {
            bank: RegisterBank::Input,
            offset,
            count,
        }
    }

    pub fn endpoint<S: Into<String>>(path: S) -> Self {
        AddressWindow::Endpoint { path: path.into() }
    }
}

impl fmt::Display for AddressWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressWindow::Registers {
                bank,
                offset,
                count,
            } => write!(f, "{:?}[{}..+{}]", bank, offset, count),
            AddressWindow::Endpoint { path } => write!(f, "endpoint {}", path),
        }
    }
}

/// What a request addresses
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Window(AddressWindow),
    /// Resolved through the device's resource map
    Resource(String),
}

/// Data handed to a write
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Registers(Vec<u16>),
    /// Encoded according to the resource's declared kind
    Value(Value),
    Json(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    Read,
    Write(Payload),
}

/// A single unit of work against a device
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub target: Target,
    pub access: Access,
}

impl OperationRequest {
    pub fn read_window(window: AddressWindow) -> Self {
        Self {
            target: Target::Window(window),
            access: Access::Read,
        }
    }

    pub fn write_window(window: AddressWindow, payload: Payload) -> Self {
        Self {
            target: Target::Window(window),
            access: Access::Write(payload),
        }
    }

    pub fn read_resource<S: Into<String>>(name: S) -> Self {
        Self {
            target: Target::Resource(name.into()),
            access: Access::Read,
        }
    }

    pub fn write_resource<S: Into<String>>(name: S, value: Value) -> Self {
        Self {
            target: Target::Resource(name.into()),
            access: Access::Write(Payload::Value(value)),
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self.access, Access::Write(_))
    }
}

/// Addressable space a device declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Capability {
    /// Number of addressable registers per bank (offsets 0..register_space)
    pub register_space: u32,
    /// Largest register count allowed in one read
    pub max_registers_per_request: u16,
}

/// Modbus PDU limit for a read holding/input registers request
pub const MODBUS_MAX_READ_REGISTERS: u16 = 125;
/// Modbus PDU limit for a write multiple registers request
pub const MODBUS_MAX_WRITE_REGISTERS: u16 = 123;

impl Default for Capability {
    fn default() -> Self {
        Self {
            register_space: 65_536,
            max_registers_per_request: MODBUS_MAX_READ_REGISTERS,
        }
    }
}

impl Capability {
    /// Check that a window is contiguous and in range; no I/O involved
    pub fn check_window(&self, window: &AddressWindow, write: bool) -> Result<()> {
        match window {
            AddressWindow::Registers {
                bank,
                offset,
                count,
            } => {
                if *count == 0 {
                    return Err(GatewayError::invalid_request("Register count must be at least 1"));
                }
                let limit = if write {
                    self.max_registers_per_request.min(MODBUS_MAX_WRITE_REGISTERS)
                } else {
                    self.max_registers_per_request
                };
                if *count > limit {
                    return Err(GatewayError::invalid_request(format!(
                        "Register count {} exceeds the per-request limit of {}",
                        count, limit
                    )));
                }
                let end = u32::from(*offset) + u32::from(*count);
                if end > self.register_space {
                    return Err(GatewayError::invalid_request(format!(
                        "Window {}..{} is outside the device register space of {}",
                        offset, end, self.register_space
                    )));
                }
                if write && *bank == RegisterBank::Input {
                    return Err(GatewayError::invalid_request("Input registers are read-only"));
                }
                Ok(())
            }
            AddressWindow::Endpoint { path } => {
                if path.is_empty() || !path.starts_with('/') {
                    return Err(GatewayError::invalid_request(format!(
                        "Endpoint path '{}' must start with '/'",
                        path
                    )));
                }
                Ok(())
            }
        }
    }
}
