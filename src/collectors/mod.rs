pub mod dummy;
pub mod furiosa_npu;
pub mod nvidia_gpu;

pub use dummy::DummyCollector;
pub use furiosa_npu::FuriosaNpu;
pub use nvidia_gpu::NvidiaGpu;

use crate::utils::errors::PowerQueryError;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// Tag naming one accelerator unit, e.g. `cuda:0` or `npu1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Source of device inventory and instantaneous power readings
#[async_trait]
pub trait PowerCollector: Send + Sync + 'static {
    /// Enumerate devices. Failures are logged and yield an empty list.
    async fn query_devices(&self) -> Vec<DeviceId>;

    /// Current power draw of one device in watts
    async fn query_power(&self, device: &DeviceId) -> Result<f64, PowerQueryError>;

    /// Device memory in use, in MB
    async fn query_memory(&self, device: &DeviceId) -> Result<f64, PowerQueryError> {
        Err(PowerQueryError::UnsupportedDevice(device.to_string()))
    }
}

/// Run a vendor CLI and return its stdout. Non-zero exit is an error.
pub(crate) async fn run_command(program: &str, args: &[&str]) -> Result<String, PowerQueryError> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|source| PowerQueryError::Command {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(PowerQueryError::ExitStatus {
            program: program.to_string(),
            status: output.status,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_command_error() {
        let result = run_command("definitely-not-a-real-smi-tool", &["info"]).await;
        assert!(matches!(result, Err(PowerQueryError::Command { .. })));
    }

    #[test]
    fn test_device_id_display() {
        let id = DeviceId::from("npu3");
        assert_eq!(id.to_string(), "npu3");
        assert_eq!(id.as_str(), "npu3");
    }
}
