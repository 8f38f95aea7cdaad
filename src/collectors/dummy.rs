use crate::collectors::{DeviceId, PowerCollector};
use crate::utils::errors::PowerQueryError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Scripted collector: fixed devices with constant per-device power draw.
#[derive(Debug, Default)]
pub struct DummyCollector {
    devices: Vec<(DeviceId, f64)>,
    memory_mb: Option<f64>,
    failing: bool,
    inventory_queries: AtomicUsize,
    power_queries: AtomicUsize,
}

impl DummyCollector {
    pub fn new(devices: Vec<(DeviceId, f64)>) -> Self {
        Self {
            devices,
            ..Self::default()
        }
    }

    /// A collector that reports no devices
    pub fn empty() -> Self {
        Self::default()
    }

    /// Devices are listed but every power query fails
    pub fn failing(devices: Vec<DeviceId>) -> Self {
        Self {
            devices: devices.into_iter().map(|d| (d, 0.0)).collect(),
            failing: true,
            ..Self::default()
        }
    }

    /// Report `memory_mb` for every known device
    pub fn with_memory(mut self, memory_mb: f64) -> Self {
        self.memory_mb = Some(memory_mb);
        self
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn inventory_queries(&self) -> usize {
        self.inventory_queries.load(Ordering::SeqCst)
    }

    pub fn power_queries(&self) -> usize {
        self.power_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PowerCollector for DummyCollector {
    async fn query_devices(&self) -> Vec<DeviceId> {
        self.inventory_queries.fetch_add(1, Ordering::SeqCst);
        self.device_ids()
    }

    async fn query_power(&self, device: &DeviceId) -> Result<f64, PowerQueryError> {
        self.power_queries.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(PowerQueryError::Parse(format!("scripted failure for {}", device)));
        }
        self.devices
            .iter()
            .find(|(id, _)| id == device)
            .map(|(_, watts)| *watts)
            .ok_or_else(|| PowerQueryError::DeviceNotFound(device.to_string()))
    }

    async fn query_memory(&self, device: &DeviceId) -> Result<f64, PowerQueryError> {
        if !self.devices.iter().any(|(id, _)| id == device) {
            return Err(PowerQueryError::DeviceNotFound(device.to_string()));
        }
        self.memory_mb
            .ok_or_else(|| PowerQueryError::UnsupportedDevice(device.to_string()))
    }
}
