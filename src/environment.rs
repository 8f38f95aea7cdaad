use crate::collectors::{DeviceId, FuriosaNpu, NvidiaGpu, PowerCollector};
use log::info;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentKind {
    Gpu,
    Npu,
    Unknown,
}

impl fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnvironmentKind::Gpu => "gpu",
            EnvironmentKind::Npu => "npu",
            EnvironmentKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Detected accelerator kind and its devices.
///
/// `kind` is `Unknown` exactly when `devices` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentDescriptor {
    kind: EnvironmentKind,
    devices: Vec<DeviceId>,
}

impl EnvironmentDescriptor {
    pub fn gpu(devices: Vec<DeviceId>) -> Self {
        Self::classify(EnvironmentKind::Gpu, devices)
    }

    pub fn npu(devices: Vec<DeviceId>) -> Self {
        Self::classify(EnvironmentKind::Npu, devices)
    }

    pub fn unknown() -> Self {
        Self {
            kind: EnvironmentKind::Unknown,
            devices: Vec::new(),
        }
    }

    fn classify(kind: EnvironmentKind, devices: Vec<DeviceId>) -> Self {
        if devices.is_empty() {
            Self::unknown()
        } else {
            Self { kind, devices }
        }
    }

    pub fn kind(&self) -> EnvironmentKind {
        self.kind
    }

    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }
}

/// Resolve the environment, GPUs first. The NPU collector is only consulted
/// when no GPU is present.
pub async fn detect_environment(
    gpu: &dyn PowerCollector,
    npu: &dyn PowerCollector,
) -> EnvironmentDescriptor {
    let gpus = gpu.query_devices().await;
    if !gpus.is_empty() {
        return EnvironmentDescriptor::gpu(gpus);
    }

    let npus = npu.query_devices().await;
    if !npus.is_empty() {
        return EnvironmentDescriptor::npu(npus);
    }

    EnvironmentDescriptor::unknown()
}

/// Probe this host with `nvidia-smi` and `furiosa-smi`.
pub async fn detect_host_environment() -> EnvironmentDescriptor {
    let environment = detect_environment(&NvidiaGpu::new(), &FuriosaNpu::new()).await;
    info!("Detected environment: {}", environment.kind());
    info!("Detected devices: {:?}", environment.devices());
    environment
}
