use super::Gateway;
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::logging::get_logger;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One gateway per configured device, shared by handle
///
/// Built once at process start and handed to every consumer; there is no
/// ambient global lookup.
#[derive(Debug, Clone, Default)]
pub struct GatewayRegistry {
    gateways: BTreeMap<String, Arc<Gateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build gateways for every device in the configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();
        for device in &config.devices {
            registry.insert(Gateway::from_config(device, &config.gateway)?)?;
        }
        Ok(registry)
    }

    /// Build only the named device's gateway
    pub fn single_from_config(config: &Config, name: &str) -> Result<Arc<Gateway>> {
        let device = config
            .device(name)
            .ok_or_else(|| GatewayError::UnknownDevice {
                name: name.to_string(),
            })?;
        Ok(Arc::new(Gateway::from_config(device, &config.gateway)?))
    }

    pub fn insert(&mut self, gateway: Gateway) -> Result<Arc<Gateway>> {
        if self.gateways.contains_key(gateway.name()) {
            return Err(GatewayError::validation(
                format!("devices.{}", gateway.name()),
                "duplicate device name".to_string(),
            ));
        }
        let gateway = Arc::new(gateway);
        self.gateways
            .insert(gateway.name().to_string(), gateway.clone());
        Ok(gateway)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Gateway>> {
        self.gateways
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownDevice {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.gateways.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Gateway>> {
        self.gateways.values()
    }

    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }

    /// Run `startup` on every gateway concurrently; returns how many came up `Good`
    pub async fn startup_all(&self) -> usize {
        let results = futures::future::join_all(self.iter().map(|gw| gw.startup())).await;
        let ready = results.iter().filter(|ok| **ok).count();
        get_logger("registry").info(&format!(
            "{} of {} device(s) ready after startup",
            ready,
            self.len()
        ));
        ready
    }

    pub async fn shutdown_all(&self) {
        futures::future::join_all(self.iter().map(|gw| gw.shutdown())).await;
    }
}
