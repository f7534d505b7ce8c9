//! Command-line access to configured devices
//!
//! Every command builds only the gateway of the device it addresses and
//! drives it through the same `execute` path the HTTP API uses, on a
//! current-thread runtime.

use crate::codec::parse_register;
use crate::config::{Config, LoggingConfig};
use crate::error::{ErrorCategory, GatewayError, Result};
use crate::gateway::{Gateway, GatewayRegistry};
use crate::request::{AddressWindow, OperationRequest, Payload, RegisterBank};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "devgate-cli")]
#[command(version, about = "Read and write field devices through devgate gateways")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path (defaults to $DEVGATE_CONFIG, then the standard locations)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long)]
    pub json: bool,

    /// Log to the console while running
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List configured devices
    Devices,

    /// Connect to a device and run its probe request
    Probe {
        device: String,
    },

    /// Read a named resource
    Read {
        device: String,
        resource: String,
    },

    /// Read a raw register window
    ReadRaw {
        device: String,

        /// First register (decimal or 0x-prefixed hex)
        #[arg(long, value_parser = parse_u16_arg)]
        offset: u16,

        /// Number of registers
        #[arg(long, default_value = "1")]
        count: u16,

        /// Read input registers instead of holding registers
        #[arg(long)]
        input: bool,
    },

    /// Write a named resource
    Write {
        device: String,
        resource: String,
        value: String,
    },

    /// Write raw holding registers starting at an offset
    WriteRaw {
        device: String,

        #[arg(long, value_parser = parse_u16_arg)]
        offset: u16,

        /// Register values (decimal or 0x-prefixed hex)
        #[arg(required = true, value_parser = parse_u16_arg)]
        values: Vec<u16>,
    },

    /// Read every resource of a device
    Dump {
        device: String,
    },
}

fn parse_u16_arg(text: &str) -> std::result::Result<u16, String> {
    parse_register(text).map_err(|e| e.to_string())
}

/// Outcome of a command, rendered as text or JSON
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub ok: bool,
    pub text: String,
    pub json: serde_json::Value,
}

impl Report {
    fn ok(text: String, json: serde_json::Value) -> Self {
        Self {
            ok: true,
            text,
            json,
        }
    }

    pub fn render(&self, as_json: bool) -> String {
        if as_json {
            self.json.to_string()
        } else {
            self.text.clone()
        }
    }
}

/// Process exit code for a failed command
pub fn exit_code(err: &GatewayError) -> i32 {
    match err.category() {
        ErrorCategory::InvalidRequest => 2,
        _ => 1,
    }
}

/// Console logging only when asked for, so stdout stays parseable
pub fn logging_config(config: &Config, verbose: bool) -> LoggingConfig {
    LoggingConfig {
        console_output: verbose,
        ..config.logging.clone()
    }
}

/// Execute a parsed command against the loaded configuration
pub fn run(cli: &Cli, config: &Config) -> Result<Report> {
    match &cli.command {
        Command::Devices => Ok(list_devices(config)),
        Command::Probe { device } => with_gateway(config, device, |rt, gw| {
            let ok = rt.block_on(gw.startup());
            let snapshot = gw.snapshot();
            Ok(Report {
                ok,
                text: format!("{}: {}", gw.name(), snapshot.status),
                json: json!({ "device": gw.name(), "ok": ok, "status": snapshot }),
            })
        }),
        Command::Read { device, resource } => with_gateway(config, device, |rt, gw| {
            let value = gw.execute_blocking(rt, OperationRequest::read_resource(resource.clone()))?;
            let unit = gw.resource(resource).and_then(|r| r.unit.clone());
            let text = match &unit {
                Some(u) => format!("{} {}", value, u),
                None => value.to_string(),
            };
            Ok(Report::ok(
                text,
                json!({ "device": gw.name(), "resource": resource, "value": value, "unit": unit }),
            ))
        }),
        Command::ReadRaw {
            device,
            offset,
            count,
            input,
        } => with_gateway(config, device, |rt, gw| {
            let bank = if *input {
                RegisterBank::Input
            } else {
                RegisterBank::Holding
            };
            let window = AddressWindow::Registers {
                bank,
                offset: *offset,
                count: *count,
            };
            let value = gw.execute_blocking(rt, OperationRequest::read_window(window))?;
            Ok(Report::ok(
                value.to_string(),
                json!({ "device": gw.name(), "offset": offset, "registers": value }),
            ))
        }),
        Command::Write {
            device,
            resource,
            value,
        } => with_gateway(config, device, |rt, gw| {
            let spec = gw
                .resource(resource)
                .ok_or_else(|| GatewayError::UnknownResource {
                    device: device.clone(),
                    resource: resource.clone(),
                })?;
            let parsed = spec.parse_value(value)?;
            gw.execute_blocking(
                rt,
                OperationRequest::write_resource(resource.clone(), parsed.clone()),
            )?;
            Ok(Report::ok(
                format!("{} = {}", resource, parsed),
                json!({ "device": gw.name(), "resource": resource, "written": parsed }),
            ))
        }),
        Command::WriteRaw {
            device,
            offset,
            values,
        } => with_gateway(config, device, |rt, gw| {
            let count = u16::try_from(values.len())
                .map_err(|_| GatewayError::invalid_request("Too many register values"))?;
            gw.execute_blocking(
                rt,
                OperationRequest::write_window(
                    AddressWindow::holding(*offset, count),
                    Payload::Registers(values.clone()),
                ),
            )?;
            Ok(Report::ok(
                format!("wrote {} register(s) at {}", count, offset),
                json!({ "device": gw.name(), "offset": offset, "written": count }),
            ))
        }),
        Command::Dump { device } => with_gateway(config, device, |rt, gw| {
            let values = rt.block_on(gw.read_all())?;
            let text = values
                .iter()
                .map(|(name, value)| format!("{}: {}", name, value))
                .collect::<Vec<_>>()
                .join("\n");
            Ok(Report::ok(
                text,
                json!({ "device": gw.name(), "values": values }),
            ))
        }),
    }
}

fn list_devices(config: &Config) -> Report {
    let text = config
        .devices
        .iter()
        .map(|d| {
            format!(
                "{}\t{}\t{} resource(s){}",
                d.name,
                d.transport.kind(),
                d.resources.len(),
                d.description
                    .as_deref()
                    .map(|s| format!("\t{}", s))
                    .unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let json = json!(
        config
            .devices
            .iter()
            .map(|d| json!({
                "name": d.name,
                "transport": d.transport.kind(),
                "resources": d.resources.len(),
                "description": d.description,
            }))
            .collect::<Vec<_>>()
    );
    Report::ok(text, json)
}

fn with_gateway<F>(config: &Config, device: &str, f: F) -> Result<Report>
where
    F: FnOnce(&tokio::runtime::Runtime, &Gateway) -> Result<Report>,
{
    let gateway = GatewayRegistry::single_from_config(config, device)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = f(&runtime, &gateway);
    runtime.block_on(gateway.shutdown());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_raw_read_with_hex_offset() {
        let cli = Cli::try_parse_from([
            "devgate-cli",
            "--json",
            "read-raw",
            "meter",
            "--offset",
            "0x10",
            "--count",
            "4",
            "--input",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(
            cli.command,
            Command::ReadRaw {
                device: "meter".to_string(),
                offset: 16,
                count: 4,
                input: true
            }
        );
    }

    #[test]
    fn write_raw_requires_values() {
        assert!(Cli::try_parse_from(["devgate-cli", "write-raw", "meter", "--offset", "1"]).is_err());
        let cli =
            Cli::try_parse_from(["devgate-cli", "write-raw", "meter", "--offset", "1", "5", "0xff"])
                .unwrap();
        assert_eq!(
            cli.command,
            Command::WriteRaw {
                device: "meter".to_string(),
                offset: 1,
                values: vec![5, 255]
            }
        );
    }

    #[test]
    fn exit_codes_follow_category() {
        assert_eq!(exit_code(&GatewayError::invalid_request("x")), 2);
        assert_eq!(
            exit_code(&GatewayError::UnknownDevice {
                name: "x".to_string()
            }),
            2
        );
        assert_eq!(exit_code(&GatewayError::timeout("x")), 1);
        assert_eq!(exit_code(&GatewayError::decoding("x")), 1);
    }

    #[test]
    fn unknown_device_is_an_invalid_request() {
        let cli = Cli::try_parse_from(["devgate-cli", "read", "nope", "power"]).unwrap();
        let err = run(&cli, &Config::default()).unwrap_err();
        assert!(matches!(err, GatewayError::UnknownDevice { .. }));
        assert_eq!(exit_code(&err), 2);
    }

    #[test]
    fn devices_lists_configuration_without_io() {
        let yaml = r#"
devices:
  - name: meter
    description: Main meter
    transport:
      type: modbus_tcp
      host: 127.0.0.1
    resources:
      - name: power
        offset: 10
        kind: f32
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let cli = Cli::try_parse_from(["devgate-cli", "devices"]).unwrap();
        let report = run(&cli, &config).unwrap();
        assert!(report.ok);
        assert_eq!(report.text, "meter\tmodbus_tcp\t1 resource(s)\tMain meter");
        assert_eq!(report.json[0]["name"], "meter");
    }
}
