use crate::collectors::{run_command, DeviceId, PowerCollector};
use crate::utils::errors::PowerQueryError;
use async_trait::async_trait;
use log::{debug, error};
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

const FURIOSA_SMI: &str = "furiosa-smi";
/// Column of the `furiosa-smi info` table holding the power reading,
/// counted after splitting a row on `|` (the leading border yields index 0).
const POWER_COLUMN: usize = 5;
const MEMORY_LABEL: &str = "Memory Usage";

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[.*?m").expect("valid ANSI regex"));
static NPU_DEVICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"npu\d+").expect("valid NPU regex"));

/// Furiosa NPUs read through `furiosa-smi info`
#[derive(Debug, Default, Clone)]
pub struct FuriosaNpu;

impl FuriosaNpu {
    pub fn new() -> Self {
        Self
    }
}

pub fn strip_ansi(output: &str) -> Cow<'_, str> {
    ANSI_ESCAPE.replace_all(output, "")
}

/// Device ids in first-seen order, one per line that mentions `npu<N>`.
pub fn parse_npu_devices(output: &str) -> Vec<DeviceId> {
    strip_ansi(output)
        .lines()
        .filter_map(|line| NPU_DEVICE.find(line))
        .map(|m| DeviceId::new(m.as_str()))
        .collect()
}

/// Power draw of `device` from an `info` table, e.g.
/// `| npu0 | rngd | <firmware> | 35.62°C | 42.00 W | <pci-bdf> |`.
pub fn parse_npu_power(output: &str, device: &DeviceId) -> Result<f64, PowerQueryError> {
    let clean = strip_ansi(output);
    let columns: Vec<&str> = clean
        .lines()
        .map(|line| line.trim().split('|').map(str::trim).collect::<Vec<_>>())
        .find(|columns| columns.get(1) == Some(&device.as_str()))
        .ok_or_else(|| PowerQueryError::DeviceNotFound(device.to_string()))?;

    let power = columns
        .get(POWER_COLUMN)
        .copied()
        .ok_or_else(|| PowerQueryError::Parse(format!("Row for {} has no power column", device)))?;
    if !power.contains('W') {
        return Err(PowerQueryError::MissingUnit(power.to_string()));
    }

    let value = power.split_whitespace().next().unwrap_or_default();
    value
        .trim_end_matches('W')
        .parse::<f64>()
        .map_err(|e| PowerQueryError::Parse(format!("'{}': {}", power, e)))
}

/// Memory in use from `info --device` output, e.g. `Memory Usage: 512 MB`.
pub fn parse_npu_memory(output: &str) -> Result<f64, PowerQueryError> {
    let clean = strip_ansi(output);
    let line = clean
        .lines()
        .find(|line| line.contains(MEMORY_LABEL))
        .ok_or_else(|| PowerQueryError::Parse(format!("No '{}' line", MEMORY_LABEL)))?;

    let value = line
        .split_once(':')
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .ok_or_else(|| PowerQueryError::Parse(format!("No value in '{}'", line.trim())))?;
    value
        .parse::<f64>()
        .map_err(|e| PowerQueryError::Parse(format!("'{}': {}", value, e)))
}

#[async_trait]
impl PowerCollector for FuriosaNpu {
    async fn query_devices(&self) -> Vec<DeviceId> {
        match run_command(FURIOSA_SMI, &["info"]).await {
            Ok(output) => {
                let devices = parse_npu_devices(&output);
                debug!("furiosa-smi reported devices: {:?}", devices);
                devices
            }
            Err(e) => {
                error!("Failed to detect NPUs: {}", e);
                Vec::new()
            }
        }
    }

    async fn query_power(&self, device: &DeviceId) -> Result<f64, PowerQueryError> {
        let output = run_command(FURIOSA_SMI, &["info"]).await?;
        parse_npu_power(&output, device)
    }

    async fn query_memory(&self, device: &DeviceId) -> Result<f64, PowerQueryError> {
        let output = run_command(FURIOSA_SMI, &["info", "--device", device.as_str()]).await?;
        parse_npu_memory(&output)
    }
}
