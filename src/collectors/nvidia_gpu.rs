use crate::collectors::{run_command, DeviceId, PowerCollector};
use crate::utils::errors::PowerQueryError;
use async_trait::async_trait;
use log::{debug, error};

const NVIDIA_SMI: &str = "nvidia-smi";
const DEVICE_PREFIX: &str = "cuda:";

/// NVIDIA GPUs read through `nvidia-smi`
#[derive(Debug, Default, Clone)]
pub struct NvidiaGpu;

impl NvidiaGpu {
    pub fn new() -> Self {
        Self
    }
}

/// One `cuda:<index>` per non-empty line of `--query-gpu=index` output.
pub fn parse_gpu_indices(output: &str) -> Vec<DeviceId> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|index| DeviceId::new(format!("{DEVICE_PREFIX}{index}")))
        .collect()
}

/// Parse a single `power.draw` reading (watts, no units).
pub fn parse_gpu_power(output: &str) -> Result<f64, PowerQueryError> {
    parse_reading(output, "Power consumption")
}

/// Parse a single `memory.used` reading (MiB, no units).
pub fn parse_gpu_memory(output: &str) -> Result<f64, PowerQueryError> {
    parse_reading(output, "Memory usage")
}

fn parse_reading(output: &str, what: &str) -> Result<f64, PowerQueryError> {
    let value = output.trim();
    if value.is_empty() {
        return Err(PowerQueryError::Parse(format!("{} value not found", what)));
    }
    value
        .parse::<f64>()
        .map_err(|e| PowerQueryError::Parse(format!("'{}': {}", value, e)))
}

fn gpu_index(device: &DeviceId) -> Result<&str, PowerQueryError> {
    device
        .as_str()
        .strip_prefix(DEVICE_PREFIX)
        .filter(|index| !index.is_empty())
        .ok_or_else(|| PowerQueryError::UnsupportedDevice(device.to_string()))
}

#[async_trait]
impl PowerCollector for NvidiaGpu {
    async fn query_devices(&self) -> Vec<DeviceId> {
        match run_command(NVIDIA_SMI, &["--query-gpu=index", "--format=csv,noheader"]).await {
            Ok(output) => {
                let devices = parse_gpu_indices(&output);
                debug!("nvidia-smi reported devices: {:?}", devices);
                devices
            }
            Err(e) => {
                error!("Failed to detect GPUs: {}", e);
                Vec::new()
            }
        }
    }

    async fn query_power(&self, device: &DeviceId) -> Result<f64, PowerQueryError> {
        let index = gpu_index(device)?;
        let output = run_command(
            NVIDIA_SMI,
            &["--id", index, "--query-gpu=power.draw", "--format=csv,noheader,nounits"],
        )
        .await?;
        parse_gpu_power(&output)
    }

    async fn query_memory(&self, device: &DeviceId) -> Result<f64, PowerQueryError> {
        let index = gpu_index(device)?;
        let output = run_command(
            NVIDIA_SMI,
            &["--id", index, "--query-gpu=memory.used", "--format=csv,noheader,nounits"],
        )
        .await?;
        parse_gpu_memory(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gpu_indices() {
        let devices = parse_gpu_indices("0\n1\n\n 3 \n");
        assert_eq!(
            devices,
            vec![DeviceId::from("cuda:0"), DeviceId::from("cuda:1"), DeviceId::from("cuda:3")]
        );
    }

    #[test]
    fn test_parse_gpu_indices_empty_output() {
        assert!(parse_gpu_indices("").is_empty());
        assert!(parse_gpu_indices("\n  \n").is_empty());
    }

    #[test]
    fn test_parse_gpu_power() {
        assert_eq!(parse_gpu_power("71.42\n").unwrap(), 71.42);
        assert!(matches!(parse_gpu_power(""), Err(PowerQueryError::Parse(_))));
        assert!(matches!(parse_gpu_power("[N/A]"), Err(PowerQueryError::Parse(_))));
    }

    #[test]
    fn test_parse_gpu_memory() {
        assert_eq!(parse_gpu_memory(" 16384\n").unwrap(), 16384.0);
        let err = parse_gpu_memory("\n").unwrap_err();
        assert_eq!(err.to_string(), "Parse error: Memory usage value not found");
    }

    #[test]
    fn test_gpu_index_rejects_foreign_devices() {
        assert_eq!(gpu_index(&DeviceId::from("cuda:2")).unwrap(), "2");
        assert!(matches!(
            gpu_index(&DeviceId::from("npu0")),
            Err(PowerQueryError::UnsupportedDevice(_))
        ));
    }

    #[tokio::test]
    async fn test_query_power_unsupported_device() {
        let gpu = NvidiaGpu::new();
        let result = gpu.query_power(&DeviceId::from("npu0")).await;
        assert!(result.is_err());
        let result = gpu.query_memory(&DeviceId::from("npu0")).await;
        assert!(matches!(result, Err(PowerQueryError::UnsupportedDevice(_))));
    }
}
