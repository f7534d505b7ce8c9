//! Named device resources
//!
//! Vendor register tables and endpoint layouts are configuration data. A
//! [`ResourceMap`] is built once per device from its `resources` section and
//! maps each name to a window plus the data kind used to decode it.

use crate::codec::{self, DataKind, Value};
use crate::config::ResourceConfig;
use crate::error::{GatewayError, Result};
use crate::request::{AddressWindow, Capability};
use serde::Serialize;
use std::collections::BTreeMap;

/// A resolved, validated resource declaration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSpec {
    pub name: String,
    pub window: AddressWindow,
    pub kind: DataKind,
    pub writable: bool,
    /// JSON pointer into an HTTP response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ResourceSpec {
    /// Build from configuration, checking the window against the device capability
    pub fn from_config(cfg: &ResourceConfig, capability: &Capability) -> Result<Self> {
        let field = format!("resources.{}", cfg.name);
        if cfg.name.trim().is_empty() {
            return Err(GatewayError::validation(
                "resources.name".to_string(),
                "Resource name cannot be empty".to_string(),
            ));
        }
        let window = match (&cfg.path, cfg.offset) {
            (Some(path), None) => AddressWindow::endpoint(path.clone()),
            (None, Some(offset)) => {
                let count = match (cfg.count, cfg.kind.register_width()) {
                    (Some(c), _) => c,
                    (None, Some(w)) => w,
                    (None, None) => {
                        return Err(GatewayError::validation(
                            field,
                            format!("count is required for {:?} resources", cfg.kind),
                        ));
                    }
                };
                if let Some(width) = cfg.kind.register_width()
                    && count < width
                {
                    return Err(GatewayError::validation(
                        field,
                        format!("{:?} needs {} registers, count is {}", cfg.kind, width, count),
                    ));
                }
                AddressWindow::Registers {
                    bank: cfg.bank,
                    offset,
                    count,
                }
            }
            (Some(_), Some(_)) => {
                return Err(GatewayError::validation(
                    field,
                    "set either path or offset, not both".to_string(),
                ));
            }
            (None, None) => {
                return Err(GatewayError::validation(
                    field,
                    "either path or offset is required".to_string(),
                ));
            }
        };
        capability
            .check_window(&window, cfg.writable)
            .map_err(|e| GatewayError::validation(field.clone(), e.to_string()))?;
        if cfg.scale == Some(0.0) {
            return Err(GatewayError::validation(field, "scale must not be zero".to_string()));
        }
        Ok(Self {
            name: cfg.name.clone(),
            window,
            kind: cfg.kind,
            writable: cfg.writable,
            pointer: cfg.pointer.clone(),
            scale: cfg.scale,
            unit: cfg.unit.clone(),
            description: cfg.description.clone(),
        })
    }
}

impl ResourceSpec {
    /// Kind used to parse caller input; scaled numbers accept fractions
    fn input_kind(&self) -> DataKind {
        if self.scale.is_some() && self.kind.is_numeric() {
            DataKind::F64
        } else {
            self.kind
        }
    }

    /// Parse a textual value (CLI argument) for this resource
    pub fn parse_value(&self, text: &str) -> Result<Value> {
        codec::parse_value(self.input_kind(), text)
    }

    /// Interpret a JSON request body value for this resource
    pub fn value_from_json(&self, json: &serde_json::Value) -> Result<Value> {
        codec::value_from_json(self.input_kind(), json)
    }
}

/// Name → resource lookup for one device
#[derive(Debug, Clone, Default)]
pub struct ResourceMap {
    entries: BTreeMap<String, ResourceSpec>,
    /// Declaration order, used to pick a default probe
    order: Vec<String>,
}

impl ResourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(resources: &[ResourceConfig], capability: &Capability) -> Result<Self> {
        let mut map = Self::new();
        for cfg in resources {
            map.insert(ResourceSpec::from_config(cfg, capability)?)?;
        }
        Ok(map)
    }

    pub fn insert(&mut self, spec: ResourceSpec) -> Result<()> {
        if self.entries.contains_key(&spec.name) {
            return Err(GatewayError::validation(
                format!("resources.{}", spec.name),
                "duplicate resource name".to_string(),
            ));
        }
        self.order.push(spec.name.clone());
        self.entries.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ResourceSpec> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resources in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.order.iter().filter_map(|n| self.entries.get(n))
    }

    pub fn first(&self) -> Option<&ResourceSpec> {
        self.iter().next()
    }
}
