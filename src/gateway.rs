//! Device gateway
//!
//! A [`Gateway`] owns exactly one [`DeviceDriver`] for its whole life and is
//! the only way to reach it. It provides:
//!
//! - mutual exclusion: one operation at a time inside the driver, served in
//!   FIFO order by a `tokio::sync::Mutex`;
//! - a cached [`Status`] updated after every operation and readable without
//!   taking the exclusive lock;
//! - retry with exponential backoff for transient failures;
//! - startup probing and a health surface.
//!
//! Requests are validated before the lock is taken, so a malformed request
//! never waits behind device traffic and never reaches the driver.

use crate::codec::Value;
use crate::config::{DeviceConfig, GatewayDefaults, GatewaySettings, HealthCheckKind};
use crate::driver::{DeviceDriver, build_driver};
use crate::error::{GatewayError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::request::{AddressWindow, Capability, OperationRequest};
use crate::resources::{ResourceMap, ResourceSpec};
use crate::retry::{Attempt, RetryDecision, RetryPolicy};
use crate::status::{BadReason, Status, StatusCell, StatusSnapshot};
use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio_util::sync::CancellationToken;

mod plan;
pub mod registry;

use plan::{Addressing, Plan};
pub use registry::GatewayRegistry;

/// Construction parameters besides the driver itself
#[derive(Debug, Clone, Default)]
pub struct GatewayOptions {
    pub settings: GatewaySettings,
    pub capability: Capability,
    pub resources: ResourceMap,
    /// Resource read by `startup` and `check_access`
    pub probe: Option<String>,
    pub health_check: HealthCheckKind,
}

pub struct Gateway {
    name: String,
    transport: &'static str,
    driver: Mutex<Box<dyn DeviceDriver>>,
    /// Set when an operation was dropped mid-I/O; the next holder reconnects
    needs_reset: AtomicBool,
    status: StatusCell,
    retry: RetryPolicy,
    settings: GatewaySettings,
    capability: Capability,
    resources: ResourceMap,
    addressing: Addressing,
    probe: Plan,
    health_check: HealthCheckKind,
    logger: StructuredLogger,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("name", &self.name)
            .field("transport", &self.transport)
            .field("status", &self.status.current())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Wrap a driver. The driver is owned by the gateway from here on.
    pub fn new(
        name: impl Into<String>,
        driver: Box<dyn DeviceDriver>,
        options: GatewayOptions,
    ) -> Result<Self> {
        let name = name.into();
        let addressing = Addressing {
            registers: driver.supports(&AddressWindow::holding(0, 1)),
            endpoints: driver.supports(&AddressWindow::endpoint("/")),
        };
        let probe = probe_plan(&name, &options, addressing)?;
        let logger = get_logger_with_context(LogContext::new("gateway").with_device(&name));

        Ok(Self {
            transport: driver.kind(),
            driver: Mutex::new(driver),
            needs_reset: AtomicBool::new(false),
            status: StatusCell::new(),
            retry: RetryPolicy::from(&options.settings.retry),
            settings: options.settings,
            capability: options.capability,
            resources: options.resources,
            addressing,
            probe,
            health_check: options.health_check,
            logger,
            name,
        })
    }

    /// Build the gateway and its driver for one configured device
    pub fn from_config(device: &DeviceConfig, defaults: &GatewayDefaults) -> Result<Self> {
        device.validate()?;
        let driver = build_driver(device)?;
        let options = GatewayOptions {
            settings: defaults.settings_for(Some(device)),
            capability: device.capability,
            resources: ResourceMap::from_config(&device.resources, &device.capability)?,
            probe: device.probe.clone(),
            health_check: device.health_check,
        };
        Self::new(device.name.clone(), driver, options)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transport kind of the owned driver
    pub fn transport(&self) -> &'static str {
        self.transport
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    pub fn resources(&self) -> &ResourceMap {
        &self.resources
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceSpec> {
        self.resources.get(name)
    }

    pub fn health_check_kind(&self) -> HealthCheckKind {
        self.health_check
    }

    /// Last cached status; never takes the exclusive lock
    pub fn current_status(&self) -> Status {
        self.status.current()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    /// Receive every status transition
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    /// Initial connect-and-probe; returns whether the status became `Good`
    ///
    /// Safe to call again: every call re-probes.
    pub async fn startup(&self) -> bool {
        self.logger.info(&format!(
            "Starting gateway ({}, probe {})",
            self.transport,
            self.probe.window()
        ));
        let _ = self.run(&self.probe, self.retry, None, "startup").await;
        let status = self.current_status();
        if status.is_good() {
            self.logger.info("Device is reachable");
        } else {
            self.logger
                .warn(&format!("Device not ready after startup: {}", status));
        }
        status.is_good()
    }

    /// Run one operation with validation, serialization and retry
    pub async fn execute(&self, request: OperationRequest) -> Result<Value> {
        let plan = self.resolve(&request)?;
        self.run(&plan, self.retry, None, "execute").await
    }

    /// Like [`execute`](Self::execute), but gives up waiting for the lock
    /// (or for a backoff delay) once `cancel` fires
    pub async fn execute_with_cancel(
        &self,
        request: OperationRequest,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let plan = self.resolve(&request)?;
        self.run(&plan, self.retry, Some(cancel), "execute").await
    }

    /// Synchronous variant for callers that own a runtime but are not async
    pub fn execute_blocking(
        &self,
        runtime: &tokio::runtime::Runtime,
        request: OperationRequest,
    ) -> Result<Value> {
        runtime.block_on(self.execute(request))
    }

    /// One round trip of the probe request without retry
    pub async fn check_access(&self) -> bool {
        self.run(&self.probe, RetryPolicy::single_attempt(), None, "check_access")
            .await
            .is_ok()
    }

    pub async fn check_access_with_cancel(&self, cancel: &CancellationToken) -> bool {
        self.run(
            &self.probe,
            RetryPolicy::single_attempt(),
            Some(cancel),
            "check_access",
        )
        .await
        .is_ok()
    }

    /// Connect, probe, and disconnect again; leaves the cached status alone
    ///
    /// A connection opened earlier by regular traffic is reused and kept, so
    /// the gateway never holds more than one live connection.
    pub async fn check_connectivity(&self) -> Result<()> {
        let mut driver = self.acquire(None).await?;
        let in_flight = InFlight::start(self, false);
        let was_connected = driver.is_connected();
        let probe = AssertUnwindSafe(self.attempt(&mut **driver, &self.probe))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panic_error(panic)));
        if !was_connected || probe.is_err() {
            self.disconnect_quietly(&mut **driver).await;
        }
        in_flight.finish();
        probe.map(|_| ())
    }

    /// Read every declared resource while holding the lock once
    ///
    /// A device without resources yields an empty map without touching the
    /// driver or the cached status.
    pub async fn read_all(&self) -> Result<BTreeMap<String, Value>> {
        if self.resources.is_empty() {
            return Ok(BTreeMap::new());
        }
        let plans: Vec<(String, Plan)> = self
            .resources
            .iter()
            .map(|spec| (spec.name.clone(), Plan::read_resource(spec)))
            .collect();
        let mut values = BTreeMap::new();

        let logger = self.op_logger("read_all");
        let mut driver = self.acquire(None).await?;
        let in_flight = InFlight::start(self, true);
        self.status.begin();
        for (name, plan) in &plans {
            match self.perform(&mut driver, plan, self.retry, None, &logger).await {
                Ok(value) => {
                    values.insert(name.clone(), value);
                }
                Err(e) => {
                    self.record(&Err(e.clone()), &logger);
                    in_flight.finish();
                    return Err(e);
                }
            }
        }
        self.status.succeed();
        in_flight.finish();
        Ok(values)
    }

    /// Disconnect the driver and mark the device as not connected
    pub async fn shutdown(&self) {
        let mut driver = self.driver.lock().await;
        self.needs_reset.store(false, Ordering::SeqCst);
        self.disconnect_quietly(&mut **driver).await;
        self.status.set(Status::Bad(BadReason::NotConnected));
        self.logger.info("Gateway shut down");
    }

    fn resolve(&self, request: &OperationRequest) -> Result<Plan> {
        plan::resolve(
            &self.name,
            request,
            &self.capability,
            &self.resources,
            self.addressing,
        )
        .inspect_err(|e| self.logger.debug(&format!("Rejected request: {}", e)))
    }

    fn op_logger(&self, op: &str) -> StructuredLogger {
        self.logger
            .with_field("op", op.to_string())
            .with_field("op_id", uuid::Uuid::new_v4().simple().to_string())
    }

    async fn acquire(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<MutexGuard<'_, Box<dyn DeviceDriver>>> {
        let mut guard = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(GatewayError::cancelled(
                    "Cancelled while waiting for device access",
                )),
                guard = self.driver.lock() => guard,
            },
            None => self.driver.lock().await,
        };
        if self.needs_reset.load(Ordering::SeqCst) {
            self.logger
                .info("Resetting the connection left behind by an abandoned operation");
            self.disconnect_quietly(&mut **guard).await;
            self.needs_reset.store(false, Ordering::SeqCst);
        }
        Ok(guard)
    }

    /// Lock, run with retries, record the outcome, release
    async fn run(
        &self,
        plan: &Plan,
        policy: RetryPolicy,
        cancel: Option<&CancellationToken>,
        op: &str,
    ) -> Result<Value> {
        let logger = self.op_logger(op);
        let mut driver = self.acquire(cancel).await?;
        let in_flight = InFlight::start(self, true);
        self.status.begin();
        logger.debug(&format!("Running {}", plan.window()));
        let result = self.perform(&mut driver, plan, policy, cancel, &logger).await;
        self.record(&result, &logger);
        in_flight.finish();
        result
    }

    fn record(&self, result: &Result<Value>, logger: &StructuredLogger) {
        match result {
            Ok(_) => self.status.succeed(),
            // Status was settled where the cancellation was observed
            Err(GatewayError::Cancelled { .. }) => {}
            Err(e) => {
                logger.warn(&format!("Operation failed: {}", e));
                self.status.fail(e.bad_reason(), e.to_string());
            }
        }
    }

    /// Retry loop over classified attempts; the caller holds the lock
    async fn perform(
        &self,
        driver: &mut Box<dyn DeviceDriver>,
        plan: &Plan,
        policy: RetryPolicy,
        cancel: Option<&CancellationToken>,
        logger: &StructuredLogger,
    ) -> Result<Value> {
        let mut attempt = 1;
        loop {
            let outcome = AssertUnwindSafe(self.attempt(&mut **driver, plan))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(panic_error(panic)));

            let error = match Attempt::from(outcome) {
                Attempt::Ok(value) => return Ok(value),
                Attempt::Terminal(e) => {
                    if matches!(e, GatewayError::Internal { .. }) {
                        logger.error(&format!("Driver fault: {}", e));
                        self.disconnect_quietly(&mut **driver).await;
                    }
                    return Err(e);
                }
                Attempt::Transient(e) => e,
            };

            // Start the next attempt from a fresh connection
            self.disconnect_quietly(&mut **driver).await;

            let delay = match policy.decide(error.class(), attempt) {
                RetryDecision::GiveUp if policy.max_attempts > 1 => {
                    return Err(GatewayError::RetryExhausted {
                        attempts: attempt,
                        last: Box::new(error),
                    });
                }
                RetryDecision::GiveUp => return Err(error),
                RetryDecision::RetryAfter(delay) => delay,
            };

            logger.warn(&format!(
                "Attempt {}/{} failed: {}; retrying in {:?}",
                attempt, policy.max_attempts, error, delay
            ));
            if let Some(token) = cancel {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        self.status.fail(error.bad_reason(), error.to_string());
                        return Err(GatewayError::cancelled(format!(
                            "Cancelled during backoff after {} attempt(s)",
                            attempt
                        )));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            } else {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    /// One connect-if-needed plus I/O round trip, each step bounded by a timeout
    async fn attempt(&self, driver: &mut dyn DeviceDriver, plan: &Plan) -> Result<Value> {
        if !driver.is_connected() {
            bounded(self.settings.connect_timeout, "connect", driver.connect()).await?;
        }
        let timeout = self.settings.operation_timeout;
        match plan {
            Plan::Read { window, .. } => {
                let raw = bounded(timeout, "read", driver.read(window)).await?;
                plan.decode(raw)
            }
            Plan::Write { window, data } => {
                bounded(timeout, "write", driver.write(window, data)).await?;
                Ok(Value::Unit)
            }
        }
    }

    async fn disconnect_quietly(&self, driver: &mut dyn DeviceDriver) {
        if !driver.is_connected() {
            return;
        }
        match tokio::time::timeout(self.settings.connect_timeout, driver.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self
                .logger
                .debug(&format!("Ignoring disconnect error: {}", e)),
            Err(_) => self.logger.debug("Disconnect timed out"),
        }
    }
}

/// Marks an operation that holds the device lock
///
/// Dropped without [`finish`](Self::finish) means the caller's future went
/// away mid-I/O: the driver may still have a response pending on the wire,
/// so the next lock holder reconnects first.
struct InFlight<'a> {
    gateway: &'a Gateway,
    tracks_status: bool,
    finished: bool,
}

impl<'a> InFlight<'a> {
    fn start(gateway: &'a Gateway, tracks_status: bool) -> Self {
        Self {
            gateway,
            tracks_status,
            finished: false,
        }
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.gateway.needs_reset.store(true, Ordering::SeqCst);
        if self.tracks_status {
            self.gateway.status.fail(
                BadReason::Timeout,
                "Operation abandoned before the device answered",
            );
        }
        self.gateway
            .logger
            .warn("Operation dropped while holding the device; connection will be reset");
    }
}

async fn bounded<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| GatewayError::timeout(format!("Device {} timed out after {:?}", what, limit)))?
}

fn panic_error(panic: Box<dyn std::any::Any + Send>) -> GatewayError {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    GatewayError::internal(format!("Driver panicked: {}", detail))
}

/// The request `startup` and `check_access` send
fn probe_plan(device: &str, options: &GatewayOptions, addressing: Addressing) -> Result<Plan> {
    if let Some(name) = &options.probe {
        let spec = options
            .resources
            .get(name)
            .ok_or_else(|| GatewayError::UnknownResource {
                device: device.to_string(),
                resource: name.clone(),
            })?;
        return Ok(Plan::read_resource(spec));
    }
    if let Some(spec) = options.resources.first() {
        return Ok(Plan::read_resource(spec));
    }
    let window = if addressing.registers {
        AddressWindow::holding(0, 1)
    } else {
        AddressWindow::endpoint("/")
    };
    Ok(Plan::Read { window, spec: None })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceConfig;
    use crate::driver::RawData;

    /// Driver that answers every read with a fixed register block
    struct Echo {
        connected: bool,
        registers: Vec<u16>,
    }

    #[async_trait::async_trait]
    impl DeviceDriver for Echo {
        fn kind(&self) -> &'static str {
            "echo"
        }
        fn is_connected(&self) -> bool {
            self.connected
        }
        fn supports(&self, window: &AddressWindow) -> bool {
            matches!(window, AddressWindow::Registers { .. })
        }
        async fn connect(&mut self) -> Result<()> {
            self.connected = true;
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<()> {
            self.connected = false;
            Ok(())
        }
        async fn read(&mut self, window: &AddressWindow) -> Result<RawData> {
            match window {
                AddressWindow::Registers { count, .. } => Ok(RawData::Registers(
                    self.registers.iter().copied().take(*count as usize).collect(),
                )),
                _ => Err(GatewayError::invalid_request("registers only")),
            }
        }
        async fn write(&mut self, _window: &AddressWindow, data: &RawData) -> Result<()> {
            if let RawData::Registers(regs) = data {
                self.registers = regs.clone();
            }
            Ok(())
        }
    }

    fn gateway(resources: Vec<ResourceConfig>, probe: Option<&str>) -> Result<Gateway> {
        let capability = Capability::default();
        Gateway::new(
            "echo",
            Box::new(Echo {
                connected: false,
                registers: vec![7, 8, 9],
            }),
            GatewayOptions {
                resources: ResourceMap::from_config(&resources, &capability)?,
                capability,
                probe: probe.map(str::to_string),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn status_starts_uncertain_and_startup_makes_it_good() {
        let gw = gateway(Vec::new(), None).unwrap();
        assert_eq!(gw.current_status(), Status::Uncertain);
        assert!(gw.startup().await);
        assert_eq!(gw.current_status(), Status::Good);
        assert_eq!(gw.transport(), "echo");
    }

    #[tokio::test]
    async fn raw_window_round_trip() {
        let gw = gateway(Vec::new(), None).unwrap();
        gw.execute(OperationRequest::write_window(
            AddressWindow::holding(0, 2),
            crate::request::Payload::Registers(vec![1, 2]),
        ))
        .await
        .unwrap();
        let value = gw
            .execute(OperationRequest::read_window(AddressWindow::holding(0, 2)))
            .await
            .unwrap();
        assert_eq!(value, Value::Registers(vec![1, 2]));
    }

    #[test]
    fn unknown_probe_resource_is_rejected() {
        let err = gateway(Vec::new(), Some("missing")).unwrap_err();
        assert!(matches!(err, GatewayError::UnknownResource { .. }));
    }

    #[tokio::test]
    async fn read_all_decodes_every_resource() {
        let gw = gateway(
            vec![
                ResourceConfig {
                    name: "a".to_string(),
                    offset: Some(0),
                    kind: crate::codec::DataKind::U16,
                    ..Default::default()
                },
                ResourceConfig {
                    name: "b".to_string(),
                    offset: Some(0),
                    count: Some(2),
                    ..Default::default()
                },
            ],
            None,
        )
        .unwrap();
        let values = gw.read_all().await.unwrap();
        assert_eq!(values["a"], Value::U16(7));
        assert_eq!(values["b"], Value::Registers(vec![7, 8]));
        assert!(gw.current_status().is_good());
    }

    #[tokio::test]
    async fn shutdown_marks_not_connected() {
        let gw = gateway(Vec::new(), None).unwrap();
        assert!(gw.startup().await);
        gw.shutdown().await;
        assert_eq!(
            gw.current_status(),
            Status::Bad(BadReason::NotConnected)
        );
    }

    #[tokio::test]
    async fn connectivity_probe_disconnects_only_its_own_connection() {
        let gw = gateway(Vec::new(), None).unwrap();
        gw.check_connectivity().await.unwrap();
        assert!(!gw.driver.lock().await.is_connected());

        assert!(gw.check_access().await);
        gw.check_connectivity().await.unwrap();
        assert!(gw.driver.lock().await.is_connected());
    }
}
