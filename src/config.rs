//! Configuration management for devgate
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files. Device connection parameters are immutable
//! once a gateway has been built from them.

use crate::codec::DataKind;
use crate::error::{GatewayError, Result};
use crate::request::{Capability, RegisterBank};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

mod defaults;

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "DEVGATE_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Web server binding configuration
    pub web: WebConfig,

    /// Defaults applied to every device gateway
    pub gateway: GatewayDefaults,

    /// Devices exposed by this process, one gateway each
    pub devices: Vec<DeviceConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level
    pub console_level: Option<String>,

    /// Optional file-specific level
    pub file_level: Option<String>,

    /// Optional level for the web log stream
    pub web_level: Option<String>,

    /// Path to log file (or directory)
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub host: String,

    /// TCP port
    pub port: u16,
}

/// Retry policy parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per operation, including the first
    pub max_attempts: u32,

    /// Delay before the first retry; doubles for every further retry
    pub base_delay_ms: u64,

    /// Upper bound for a single retry delay
    pub max_delay_ms: u64,
}

/// Timeouts and retry defaults shared by all gateways
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GatewayDefaults {
    /// Bound for a single device round trip
    pub operation_timeout_ms: u64,

    /// Bound for establishing a connection
    pub connect_timeout_ms: u64,

    /// Bound for a connectivity health probe
    pub probe_timeout_ms: u64,

    pub retry: RetryConfig,
}

/// Transport used to reach a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Modbus TCP
    ModbusTcp {
        host: String,
        #[serde(default = "default_modbus_port")]
        port: u16,
        #[serde(default = "default_unit_id")]
        unit_id: u8,
    },
    /// Modbus RTU over a serial line
    ModbusRtu {
        port: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
        /// none, odd or even
        #[serde(default = "default_parity")]
        parity: String,
        #[serde(default = "default_unit_id")]
        unit_id: u8,
    },
    /// Vendor HTTP/JSON API
    Http {
        base_url: String,
        /// Client-side request timeout
        #[serde(default)]
        timeout_ms: Option<u64>,
        /// Extra headers sent with every request (API keys etc.)
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

fn default_modbus_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_parity() -> String {
    "none".to_string()
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::ModbusTcp { .. } => "modbus_tcp",
            TransportConfig::ModbusRtu { .. } => "modbus_rtu",
            TransportConfig::Http { .. } => "http",
        }
    }

    pub fn is_modbus(&self) -> bool {
        !matches!(self, TransportConfig::Http { .. })
    }
}

/// How the health surface checks a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckKind {
    /// Report the gateway's cached status; never touches the device
    #[default]
    CachedStatus,
    /// Run a bounded connect-probe-disconnect cycle
    Connectivity,
}

/// One named, addressable resource of a device
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(default)]
pub struct ResourceConfig {
    pub name: String,

    pub description: Option<String>,

    /// Register bank (Modbus devices)
    pub bank: RegisterBank,

    /// First register (Modbus devices)
    pub offset: Option<u16>,

    /// Register count; defaults to the width of `kind`
    pub count: Option<u16>,

    /// Endpoint path (HTTP devices)
    pub path: Option<String>,

    /// JSON pointer into the endpoint response (HTTP devices)
    pub pointer: Option<String>,

    pub kind: DataKind,

    pub writable: bool,

    /// Linear factor applied to numeric reads (divided out on writes)
    pub scale: Option<f64>,

    /// Engineering unit, informational
    pub unit: Option<String>,
}

/// A single device and its gateway settings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DeviceConfig {
    /// Unique device name used by the CLI and HTTP routes
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    pub transport: TransportConfig,

    /// Overrides `gateway.operation_timeout_ms`
    #[serde(default)]
    pub operation_timeout_ms: Option<u64>,

    /// Overrides `gateway.retry`
    #[serde(default)]
    pub retry: Option<RetryConfig>,

    #[serde(default)]
    pub capability: Capability,

    #[serde(default)]
    pub health_check: HealthCheckKind,

    /// Resource read by startup and liveness probes; defaults to the first resource
    #[serde(default)]
    pub probe: Option<String>,

    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// Effective per-device gateway settings after applying defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewaySettings {
    pub operation_timeout: Duration,
    pub connect_timeout: Duration,
    pub probe_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        GatewayDefaults::default().settings_for(None)
    }
}

impl GatewayDefaults {
    /// Resolve settings for a device, honouring its overrides
    pub fn settings_for(&self, device: Option<&DeviceConfig>) -> GatewaySettings {
        let op_ms = device
            .and_then(|d| d.operation_timeout_ms)
            .unwrap_or(self.operation_timeout_ms);
        let retry = device.and_then(|d| d.retry).unwrap_or(self.retry);
        GatewaySettings {
            operation_timeout: Duration::from_millis(op_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            retry,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from `$DEVGATE_CONFIG` or the default locations
    pub fn load() -> Result<Self> {
        if let Some(explicit) = std::env::var_os(CONFIG_ENV) {
            return Self::from_file(explicit);
        }

        let default_paths = [
            "devgate_config.yaml",
            "/data/devgate_config.yaml",
            "/etc/devgate/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Load from an explicit path if given, otherwise search the defaults
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Self::load(),
        }
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.web.port == 0 {
            return Err(GatewayError::validation("web.port", "Port must be greater than 0"));
        }

        self.gateway.validate("gateway")?;

        let mut names = HashSet::new();
        for device in &self.devices {
            if !names.insert(device.name.as_str()) {
                return Err(GatewayError::validation(
                    format!("devices.{}", device.name),
                    "Duplicate device name".to_string(),
                ));
            }
            device.validate()?;
        }

        Ok(())
    }
}

impl GatewayDefaults {
    fn validate(&self, prefix: &str) -> Result<()> {
        if self.operation_timeout_ms == 0 {
            return Err(GatewayError::validation(
                format!("{}.operation_timeout_ms", prefix),
                "Must be greater than 0".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(GatewayError::validation(
                format!("{}.connect_timeout_ms", prefix),
                "Must be greater than 0".to_string(),
            ));
        }
        if self.probe_timeout_ms == 0 {
            return Err(GatewayError::validation(
                format!("{}.probe_timeout_ms", prefix),
                "Must be greater than 0".to_string(),
            ));
        }
        self.retry.validate(&format!("{}.retry", prefix))
    }
}

impl RetryConfig {
    fn validate(&self, prefix: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(GatewayError::validation(
                format!("{}.max_attempts", prefix),
                "Must be at least 1".to_string(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(GatewayError::validation(
                format!("{}.max_delay_ms", prefix),
                "Must not be smaller than base_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

impl DeviceConfig {
    /// Validate transport parameters and the resource map
    pub fn validate(&self) -> Result<()> {
        let prefix = format!("devices.{}", self.name);
        if self.name.trim().is_empty() {
            return Err(GatewayError::validation(
                "devices.name",
                "Device name cannot be empty",
            ));
        }
        if self.name.contains('/') || self.name.contains(char::is_whitespace) {
            return Err(GatewayError::validation(
                prefix,
                "Device name must not contain '/' or whitespace".to_string(),
            ));
        }

        match &self.transport {
            TransportConfig::ModbusTcp { host, port, .. } => {
                if host.is_empty() {
                    return Err(GatewayError::validation(
                        format!("{}.transport.host", prefix),
                        "Host cannot be empty".to_string(),
                    ));
                }
                if *port == 0 {
                    return Err(GatewayError::validation(
                        format!("{}.transport.port", prefix),
                        "Port must be greater than 0".to_string(),
                    ));
                }
            }
            TransportConfig::ModbusRtu {
                port,
                baud_rate,
                data_bits,
                stop_bits,
                parity,
                ..
            } => {
                if port.is_empty() {
                    return Err(GatewayError::validation(
                        format!("{}.transport.port", prefix),
                        "Serial port cannot be empty".to_string(),
                    ));
                }
                if *baud_rate == 0 {
                    return Err(GatewayError::validation(
                        format!("{}.transport.baud_rate", prefix),
                        "Must be greater than 0".to_string(),
                    ));
                }
                if !(5..=8).contains(data_bits) {
                    return Err(GatewayError::validation(
                        format!("{}.transport.data_bits", prefix),
                        "Must be between 5 and 8".to_string(),
                    ));
                }
                if !(1..=2).contains(stop_bits) {
                    return Err(GatewayError::validation(
                        format!("{}.transport.stop_bits", prefix),
                        "Must be 1 or 2".to_string(),
                    ));
                }
                if !matches!(parity.to_ascii_lowercase().as_str(), "none" | "odd" | "even") {
                    return Err(GatewayError::validation(
                        format!("{}.transport.parity", prefix),
                        "Must be none, odd or even".to_string(),
                    ));
                }
            }
            TransportConfig::Http { base_url, .. } => {
                if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                    return Err(GatewayError::validation(
                        format!("{}.transport.base_url", prefix),
                        "Must be an http:// or https:// URL".to_string(),
                    ));
                }
            }
        }

        if self.operation_timeout_ms == Some(0) {
            return Err(GatewayError::validation(
                format!("{}.operation_timeout_ms", prefix),
                "Must be greater than 0".to_string(),
            ));
        }
        if let Some(retry) = &self.retry {
            retry.validate(&format!("{}.retry", prefix))?;
        }
        if self.capability.max_registers_per_request == 0 || self.capability.register_space == 0 {
            return Err(GatewayError::validation(
                format!("{}.capability", prefix),
                "register_space and max_registers_per_request must be positive".to_string(),
            ));
        }

        let modbus = self.transport.is_modbus();
        for resource in &self.resources {
            let uses_registers = resource.offset.is_some();
            if modbus != uses_registers {
                return Err(GatewayError::validation(
                    format!("{}.resources.{}", prefix, resource.name),
                    if modbus {
                        "Modbus devices address resources by offset".to_string()
                    } else {
                        "HTTP devices address resources by path".to_string()
                    },
                ));
            }
        }
        crate::resources::ResourceMap::from_config(&self.resources, &self.capability)?;

        if let Some(probe) = &self.probe
            && !self.resources.iter().any(|r| &r.name == probe)
        {
            return Err(GatewayError::validation(
                format!("{}.probe", prefix),
                format!("Probe resource '{}' is not declared", probe),
            ));
        }

        Ok(())
    }
}
