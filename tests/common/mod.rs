#![allow(dead_code)]

use async_trait::async_trait;
use devgate::config::{ResourceConfig, RetryConfig};
use devgate::driver::{DeviceDriver, RawData};
use devgate::error::{GatewayError, Result};
use devgate::gateway::{Gateway, GatewayOptions};
use devgate::request::{AddressWindow, Capability};
use devgate::resources::ResourceMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// What the next driver I/O call does
#[derive(Debug, Clone)]
pub enum Step {
    Ok,
    Fail(GatewayError),
    Panic,
    Hang,
}

/// Observations shared between a test and the driver it handed away
#[derive(Debug, Default)]
pub struct Probe {
    pub calls: AtomicUsize,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    active: AtomicUsize,
    pub overlapped: AtomicBool,
    started: Mutex<Vec<Instant>>,
    writes: Mutex<Vec<Vec<u16>>>,
    script: Mutex<VecDeque<Step>>,
}

impl Probe {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<Instant> {
        self.started.lock().unwrap().clone()
    }

    /// Register blocks written so far, in the order the driver saw them
    pub fn writes(&self) -> Vec<Vec<u16>> {
        self.writes.lock().unwrap().clone()
    }

    pub fn push(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }

    fn next_step(&self) -> Step {
        self.script.lock().unwrap().pop_front().unwrap_or(Step::Ok)
    }
}

struct Active<'a>(&'a AtomicUsize);

impl Drop for Active<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scripted register device; unscripted calls succeed
pub struct MockDriver {
    connected: bool,
    latency: Duration,
    registers: Vec<u16>,
    probe: Arc<Probe>,
}

impl MockDriver {
    pub fn new(latency: Duration) -> (Self, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        (
            Self {
                connected: false,
                latency,
                registers: (0..16).collect(),
                probe: probe.clone(),
            },
            probe,
        )
    }

    async fn io(&mut self) -> Result<()> {
        let probe = self.probe.clone();
        probe.calls.fetch_add(1, Ordering::SeqCst);
        probe.started.lock().unwrap().push(Instant::now());
        if probe.active.fetch_add(1, Ordering::SeqCst) > 0 {
            probe.overlapped.store(true, Ordering::SeqCst);
        }
        let _active = Active(&probe.active);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match probe.next_step() {
            Step::Ok => Ok(()),
            Step::Fail(e) => Err(e),
            Step::Panic => panic!("scripted driver panic"),
            Step::Hang => std::future::pending::<Result<()>>().await,
        }
    }
}

#[async_trait]
impl DeviceDriver for MockDriver {
    fn kind(&self) -> &'static str {
        "mock"
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn supports(&self, window: &AddressWindow) -> bool {
        matches!(window, AddressWindow::Registers { .. })
    }

    async fn connect(&mut self) -> Result<()> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.probe.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
        Ok(())
    }

    async fn read(&mut self, window: &AddressWindow) -> Result<RawData> {
        self.io().await?;
        match window {
            AddressWindow::Registers { offset, count, .. } => {
                let start = usize::from(*offset) % self.registers.len();
                Ok(RawData::Registers(
                    self.registers
                        .iter()
                        .cycle()
                        .skip(start)
                        .take(usize::from(*count))
                        .copied()
                        .collect(),
                ))
            }
            AddressWindow::Endpoint { .. } => {
                Err(GatewayError::invalid_request("mock only has registers"))
            }
        }
    }

    async fn write(&mut self, window: &AddressWindow, data: &RawData) -> Result<()> {
        self.io().await?;
        if let (AddressWindow::Registers { offset, .. }, RawData::Registers(values)) = (window, data)
        {
            for (i, v) in values.iter().enumerate() {
                let idx = (usize::from(*offset) + i) % self.registers.len();
                self.registers[idx] = *v;
            }
            self.probe.writes.lock().unwrap().push(values.clone());
        }
        Ok(())
    }
}

pub fn retry(max_attempts: u32, base_delay_ms: u64) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay_ms,
        max_delay_ms: 30_000,
    }
}

pub fn u16_resource(name: &str, offset: u16) -> ResourceConfig {
    ResourceConfig {
        name: name.to_string(),
        offset: Some(offset),
        kind: devgate::codec::DataKind::U16,
        writable: true,
        ..Default::default()
    }
}

/// Gateway over a mock with the given latency and retry settings
pub fn mock_gateway(latency: Duration, retry: RetryConfig) -> (Arc<Gateway>, Arc<Probe>) {
    let (gw, probe) = mock_device("mock", latency, retry);
    (Arc::new(gw), probe)
}

pub fn mock_device(name: &str, latency: Duration, retry: RetryConfig) -> (Gateway, Arc<Probe>) {
    let (driver, probe) = MockDriver::new(latency);
    let capability = Capability::default();
    let mut options = GatewayOptions {
        capability,
        resources: ResourceMap::from_config(&[u16_resource("power", 3)], &capability).unwrap(),
        ..Default::default()
    };
    options.settings.retry = retry;
    options.settings.operation_timeout = Duration::from_secs(2);
    let gw = Gateway::new(name, Box::new(driver), options).unwrap();
    (gw, probe)
}
