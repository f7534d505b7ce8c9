//! Health reporting
//!
//! Translates gateway state into three-valued health reports. Each device
//! uses exactly one check contract, chosen by its configured
//! [`HealthCheckKind`]:
//!
//! - `CachedStatus` reads [`Gateway::current_status`] and never causes I/O;
//! - `Connectivity` runs [`Gateway::check_connectivity`] in a spawned task
//!   bounded by the probe timeout.
//!
//! Both honour a cancellation token: once it fires the report is
//! `Unhealthy` immediately and any in-flight probe is abandoned.

use crate::config::HealthCheckKind;
use crate::gateway::{Gateway, GatewayRegistry};
use crate::status::{Status, StatusSnapshot};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    pub fn healthy(description: impl Into<String>) -> Self {
        Self {
            state: HealthState::Healthy,
            description: description.into(),
            error: None,
        }
    }

    pub fn degraded(description: impl Into<String>) -> Self {
        Self {
            state: HealthState::Degraded,
            description: description.into(),
            error: None,
        }
    }

    pub fn unhealthy(description: impl Into<String>, error: Option<String>) -> Self {
        Self {
            state: HealthState::Unhealthy,
            description: description.into(),
            error,
        }
    }

    /// Map a cached snapshot to a report
    pub fn from_snapshot(snapshot: &StatusSnapshot) -> Self {
        match snapshot.status {
            Status::Good => Self::healthy("Last device operation succeeded"),
            Status::Uncertain => Self::degraded("No completed device operation yet"),
            Status::Bad(reason) => Self::unhealthy(
                format!("Last device operation failed: {}", reason.as_str()),
                snapshot.last_error.clone(),
            ),
        }
    }
}

/// Health check bound to one gateway
#[derive(Debug, Clone)]
pub struct HealthCheck {
    gateway: Arc<Gateway>,
    kind: HealthCheckKind,
    timeout: Duration,
    /// A spawned connectivity probe has not finished yet
    probing: Arc<AtomicBool>,
}

/// Clears the in-flight flag when the probe task ends, panics included
struct ProbeSlot(Arc<AtomicBool>);

impl Drop for ProbeSlot {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl HealthCheck {
    pub fn new(gateway: Arc<Gateway>, kind: HealthCheckKind, timeout: Duration) -> Self {
        Self {
            gateway,
            kind,
            timeout,
            probing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check using the gateway's configured kind and probe timeout
    pub fn for_gateway(gateway: Arc<Gateway>) -> Self {
        let kind = gateway.health_check_kind();
        let timeout = gateway.settings().probe_timeout;
        Self::new(gateway, kind, timeout)
    }

    pub fn kind(&self) -> HealthCheckKind {
        self.kind
    }

    pub fn device(&self) -> &str {
        self.gateway.name()
    }

    pub async fn check(&self, cancel: &CancellationToken) -> HealthReport {
        if cancel.is_cancelled() {
            return cancelled_report();
        }
        match self.kind {
            HealthCheckKind::CachedStatus => HealthReport::from_snapshot(&self.gateway.snapshot()),
            HealthCheckKind::Connectivity => self.probe(cancel).await,
        }
    }

    async fn probe(&self, cancel: &CancellationToken) -> HealthReport {
        if self.probing.swap(true, Ordering::SeqCst) {
            return HealthReport::unhealthy("Previous connectivity probe still pending", None);
        }
        let slot = ProbeSlot(self.probing.clone());
        let gateway = self.gateway.clone();
        // Detached: dropping the handle abandons the probe without awaiting it
        let handle = tokio::spawn(async move {
            let _slot = slot;
            gateway.check_connectivity().await
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => cancelled_report(),
            joined = tokio::time::timeout(self.timeout, handle) => match joined {
                Err(_) => HealthReport::unhealthy(
                    format!("Connectivity probe exceeded {:?}", self.timeout),
                    None,
                ),
                Ok(Err(join_error)) => HealthReport::unhealthy(
                    "Connectivity probe crashed",
                    Some(join_error.to_string()),
                ),
                Ok(Ok(Err(e))) => HealthReport::unhealthy(
                    "Device is not reachable",
                    Some(e.to_string()),
                ),
                Ok(Ok(Ok(()))) => HealthReport::healthy("Device answered the connectivity probe"),
            },
        }
    }
}

fn cancelled_report() -> HealthReport {
    HealthReport::unhealthy("Health check cancelled", None)
}

/// Combined result over several devices
#[derive(Debug, Clone, Serialize)]
pub struct AggregateHealth {
    pub state: HealthState,
    pub devices: BTreeMap<String, HealthReport>,
}

impl AggregateHealth {
    fn from_reports(devices: BTreeMap<String, HealthReport>) -> Self {
        let state = devices
            .values()
            .map(|r| r.state)
            .max()
            .unwrap_or(HealthState::Healthy);
        Self { state, devices }
    }
}

/// All health checks of a process
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    checks: Vec<HealthCheck>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_gateways(registry: &GatewayRegistry) -> Self {
        Self {
            checks: registry
                .iter()
                .cloned()
                .map(HealthCheck::for_gateway)
                .collect(),
        }
    }

    pub fn register(&mut self, check: HealthCheck) {
        self.checks.push(check);
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Run every configured check concurrently; worst state wins
    pub async fn check_all(&self, cancel: &CancellationToken) -> AggregateHealth {
        let reports = futures::future::join_all(self.checks.iter().map(|c| c.check(cancel))).await;
        AggregateHealth::from_reports(
            self.checks
                .iter()
                .map(|c| c.device().to_string())
                .zip(reports)
                .collect(),
        )
    }

    /// Readiness from cached status only; never touches a device
    pub fn cached(&self) -> AggregateHealth {
        AggregateHealth::from_reports(
            self.checks
                .iter()
                .map(|c| {
                    (
                        c.device().to_string(),
                        HealthReport::from_snapshot(&c.gateway.snapshot()),
                    )
                })
                .collect(),
        )
    }
}
