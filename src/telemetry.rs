use crate::collectors::DeviceId;
use crate::utils::errors::HarnessError;
use itertools::{multiunzip, Itertools};
use polars::prelude::*;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Samples of one device: elapsed seconds and watts, appended in lockstep.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSeries {
    pub device: DeviceId,
    pub elapsed: Vec<f64>,
    pub watts: Vec<f64>,
}

/// Power samples for the lifetime of one monitored call, in device order.
/// One series per distinct device; repeated ids share it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PowerTrace {
    series: Vec<DeviceSeries>,
}

impl PowerTrace {
    pub fn new(devices: &[DeviceId]) -> Self {
        Self {
            series: devices
                .iter()
                .unique()
                .map(|device| DeviceSeries {
                    device: device.clone(),
                    elapsed: Vec::new(),
                    watts: Vec::new(),
                })
                .collect(),
        }
    }

    /// Append one sample; `elapsed` is rounded to 2 decimals. Unknown devices are ignored.
    pub fn record(&mut self, device: &DeviceId, elapsed: f64, watts: f64) {
        if let Some(series) = self.series.iter_mut().find(|s| &s.device == device) {
            series.elapsed.push(round_centis(elapsed));
            series.watts.push(watts);
        }
    }

    pub fn series(&self) -> &[DeviceSeries] {
        &self.series
    }

    pub fn sample_count(&self) -> usize {
        self.series.iter().map(|s| s.watts.len()).sum()
    }

    pub fn report(&self) -> PowerReport {
        let per_device: Vec<(&DeviceId, f64)> = self
            .series
            .iter()
            .map(|s| (&s.device, s.watts.iter().fold(0.0_f64, |acc, w| acc + *w)))
            .collect();
        let absolute = per_device.iter().fold(0.0_f64, |acc, (_, sum)| acc + *sum);

        let relative = per_device
            .into_iter()
            .map(|(device, sum)| {
                let share = if absolute > 0.0 { sum / absolute } else { 0.0 };
                (device.clone(), share)
            })
            .collect();

        PowerReport { absolute, relative }
    }

    pub fn into_telemetry(self) -> Telemetry {
        let total_power = self.report();
        let mut power_data = BTreeMap::new();
        let mut timing_data = BTreeMap::new();
        for series in self.series {
            power_data.insert(series.device.clone(), series.watts);
            timing_data.insert(series.device, series.elapsed);
        }
        Telemetry {
            total_power,
            power_data,
            timing_data,
        }
    }
}

fn round_centis(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}

/// Summed power across all samples and each device's share of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerReport {
    pub absolute: f64,
    pub relative: BTreeMap<DeviceId, f64>,
}

/// Aggregated report plus the raw per-device series of one monitored call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Telemetry {
    pub total_power: PowerReport,
    pub power_data: BTreeMap<DeviceId, Vec<f64>>,
    pub timing_data: BTreeMap<DeviceId, Vec<f64>>,
}

impl Telemetry {
    /// DataFrame: device | elapsed | watts
    pub fn to_frame(&self) -> Result<DataFrame, HarnessError> {
        let (devices, elapsed, watts): (Vec<String>, Vec<f64>, Vec<f64>) =
            multiunzip(self.power_data.iter().flat_map(|(device, watts)| {
                let timings = self.timing_data.get(device).map(Vec::as_slice).unwrap_or_default();
                timings
                    .iter()
                    .zip(watts.iter())
                    .map(move |(&t, &w)| (device.to_string(), t, w))
            }));

        df![
            "device" => devices,
            "elapsed" => elapsed,
            "watts" => watts,
        ]
        .map_err(|e| HarnessError::Other(format!("Failed to create power DataFrame: {}", e)))
    }
}

/// How a monitored call's output absorbs telemetry.
///
/// Mapping-like outputs merge `total_power`, `power_data` and `timing_data`.
/// Plain values keep the default, which discards it.
pub trait TelemetrySink {
    fn attach_telemetry(&mut self, _telemetry: Telemetry) {}
}

impl TelemetrySink for String {}

impl TelemetrySink for () {}

impl TelemetrySink for Map<String, Value> {
    fn attach_telemetry(&mut self, telemetry: Telemetry) {
        match serde_json::to_value(&telemetry) {
            Ok(Value::Object(fields)) => self.extend(fields),
            Ok(other) => log::warn!("Telemetry serialized to a non-object value: {}", other),
            Err(e) => log::error!("Failed to serialize telemetry: {}", e),
        }
    }
}
