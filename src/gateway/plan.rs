//! Request resolution
//!
//! Everything here runs before the exclusive lock is taken and never touches
//! the driver, so malformed requests cannot contend for device access.

use crate::codec::{self, Value};
use crate::driver::RawData;
use crate::error::{GatewayError, Result};
use crate::request::{Access, AddressWindow, Capability, OperationRequest, Payload, Target};
use crate::resources::{ResourceMap, ResourceSpec};

/// Which window shapes the device's transport accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Addressing {
    pub registers: bool,
    pub endpoints: bool,
}

impl Addressing {
    fn accepts(&self, window: &AddressWindow) -> bool {
        match window {
            AddressWindow::Registers { .. } => self.registers,
            AddressWindow::Endpoint { .. } => self.endpoints,
        }
    }
}

/// A validated request, ready to run against the driver
#[derive(Debug, Clone)]
pub(crate) enum Plan {
    Read {
        window: AddressWindow,
        /// Resource used to decode the raw data; `None` returns it untyped
        spec: Option<ResourceSpec>,
    },
    Write {
        window: AddressWindow,
        data: RawData,
    },
}

impl Plan {
    pub fn window(&self) -> &AddressWindow {
        match self {
            Plan::Read { window, .. } | Plan::Write { window, .. } => window,
        }
    }

    pub fn read_resource(spec: &ResourceSpec) -> Self {
        Plan::Read {
            window: spec.window.clone(),
            spec: Some(spec.clone()),
        }
    }

    /// Turn driver output into the caller's value
    pub fn decode(&self, raw: RawData) -> Result<Value> {
        let spec = match self {
            Plan::Read { spec, .. } => spec.as_ref(),
            Plan::Write { .. } => return Ok(Value::Unit),
        };
        match (spec, raw) {
            (None, RawData::Registers(regs)) => Ok(Value::Registers(regs)),
            (None, RawData::Json(doc)) => Ok(Value::Json(doc)),
            (Some(spec), RawData::Registers(regs)) => {
                codec::decode_registers(spec.kind, &regs, spec.scale)
            }
            (Some(spec), RawData::Json(doc)) => {
                codec::decode_json(spec.kind, &doc, spec.pointer.as_deref(), spec.scale)
            }
        }
    }
}

/// Resolve and validate a request against the device's declared capability
pub(crate) fn resolve(
    device: &str,
    request: &OperationRequest,
    capability: &Capability,
    resources: &ResourceMap,
    addressing: Addressing,
) -> Result<Plan> {
    let plan = match &request.target {
        Target::Window(window) => {
            capability.check_window(window, request.is_write())?;
            match &request.access {
                Access::Read => Plan::Read {
                    window: window.clone(),
                    spec: None,
                },
                Access::Write(payload) => Plan::Write {
                    window: window.clone(),
                    data: window_payload(window, payload)?,
                },
            }
        }
        Target::Resource(name) => {
            let spec = resources
                .get(name)
                .ok_or_else(|| GatewayError::UnknownResource {
                    device: device.to_string(),
                    resource: name.clone(),
                })?;
            match &request.access {
                Access::Read => Plan::read_resource(spec),
                Access::Write(payload) => {
                    if !spec.writable {
                        return Err(GatewayError::invalid_request(format!(
                            "Resource '{}' is read-only",
                            spec.name
                        )));
                    }
                    Plan::Write {
                        window: spec.window.clone(),
                        data: resource_payload(spec, payload)?,
                    }
                }
            }
        }
    };

    if !addressing.accepts(plan.window()) {
        return Err(GatewayError::invalid_request(format!(
            "Device '{}' cannot address {}",
            device,
            plan.window()
        )));
    }
    Ok(plan)
}

fn window_payload(window: &AddressWindow, payload: &Payload) -> Result<RawData> {
    match (window, payload) {
        (AddressWindow::Registers { count, .. }, Payload::Registers(values))
        | (AddressWindow::Registers { count, .. }, Payload::Value(Value::Registers(values))) => {
            check_register_count(*count, values.len())?;
            Ok(RawData::Registers(values.clone()))
        }
        (AddressWindow::Endpoint { .. }, Payload::Json(doc))
        | (AddressWindow::Endpoint { .. }, Payload::Value(Value::Json(doc))) => {
            Ok(RawData::Json(doc.clone()))
        }
        (AddressWindow::Endpoint { .. }, Payload::Value(value)) => {
            Ok(RawData::Json(codec::encode_json(value, None)?))
        }
        (window, _) => Err(GatewayError::invalid_request(format!(
            "Payload does not fit window {}",
            window
        ))),
    }
}

fn resource_payload(spec: &ResourceSpec, payload: &Payload) -> Result<RawData> {
    let value = match payload {
        Payload::Value(v) => v.clone(),
        Payload::Registers(regs) => Value::Registers(regs.clone()),
        Payload::Json(doc) => Value::Json(doc.clone()),
    };
    match &spec.window {
        AddressWindow::Registers { count, .. } => {
            let registers = codec::encode_registers(spec.kind, &value, *count, spec.scale)?;
            check_register_count(*count, registers.len())?;
            Ok(RawData::Registers(registers))
        }
        AddressWindow::Endpoint { .. } => Ok(RawData::Json(codec::encode_json(&value, spec.scale)?)),
    }
}

fn check_register_count(expected: u16, given: usize) -> Result<()> {
    if usize::from(expected) != given {
        return Err(GatewayError::invalid_request(format!(
            "Window holds {} registers but {} values were given",
            expected, given
        )));
    }
    Ok(())
}
