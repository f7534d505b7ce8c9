//! # devgate - serialized gateways for field devices
//!
//! Each configured device (a Modbus TCP/RTU meter, inverter or charger, or a
//! vendor HTTP/JSON API) sits behind exactly one [`Gateway`]. The gateway
//! owns the only connection to the device and guarantees that at most one
//! operation talks to it at a time, while keeping a lock-free status that
//! health checks and the web UI can read without waiting.
//!
//! ## Architecture
//!
//! - `config`: YAML configuration, defaults and validation
//! - `request`: address windows, payloads and device capabilities
//! - `codec`: register and JSON value conversions
//! - `resources`: named resources resolved against a device
//! - `driver`: transport drivers (Modbus, HTTP) behind one trait
//! - `retry`: failure classification and backoff policy
//! - `status`: the Good/Uncertain/Bad status cell
//! - `gateway`: the serialized gateway and the per-process registry
//! - `health`: health checks built on gateway status or probes
//! - `web`: HTTP API over the registry
//! - `cli`: one-shot command-line access
//! - `logging`: tracing setup and structured loggers

pub mod cli;
pub mod codec;
pub mod config;
pub mod driver;
pub mod error;
pub mod gateway;
pub mod health;
pub mod logging;
pub mod request;
pub mod resources;
pub mod retry;
pub mod status;
pub mod web;

// Re-export commonly used types
pub use codec::Value;
pub use config::Config;
pub use driver::{DeviceDriver, RawData};
pub use error::{GatewayError, Result};
pub use gateway::{Gateway, GatewayOptions, GatewayRegistry};
pub use health::{HealthCheck, HealthRegistry, HealthReport, HealthState};
pub use request::{AddressWindow, OperationRequest, Payload};
pub use status::{BadReason, Status, StatusSnapshot};
