use accel_bench::collectors::{DeviceId, FuriosaNpu, NvidiaGpu, PowerCollector};
use accel_bench::metrics::memory_usage;
use accel_bench::telemetry::{Telemetry, TelemetrySink};
use accel_bench::utils::logger::setup_logger;
use accel_bench::{detect_host_environment, EnvironmentDescriptor, EnvironmentKind, Monitor, MonitorConfig};
use chrono::Local;
use log::{error, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_PROBE_SECONDS: f64 = 1.0;

#[derive(Serialize)]
struct ProbeReport {
    environment: EnvironmentDescriptor,
    started_at: String,
    window_seconds: f64,
    /// MB in use per device after the window
    memory_usage: BTreeMap<DeviceId, f64>,
    #[serde(flatten)]
    telemetry: Option<Telemetry>,
}

impl TelemetrySink for ProbeReport {
    fn attach_telemetry(&mut self, telemetry: Telemetry) {
        self.telemetry = Some(telemetry);
    }
}

/// Sampling window from `PROBE_SECONDS`
fn probe_window() -> Duration {
    let seconds = std::env::var("PROBE_SECONDS")
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
        .unwrap_or(DEFAULT_PROBE_SECONDS);
    Duration::from_secs_f64(seconds)
}

#[tokio::main]
async fn main() -> ExitCode {
    setup_logger();
    info!("Application started");

    let environment = detect_host_environment().await;
    let collector: Arc<dyn PowerCollector> = match environment.kind() {
        EnvironmentKind::Gpu => Arc::new(NvidiaGpu::new()),
        EnvironmentKind::Npu => Arc::new(FuriosaNpu::new()),
        EnvironmentKind::Unknown => {
            error!("No GPU or NPU detected, nothing to monitor.");
            return ExitCode::FAILURE;
        }
    };

    let window = probe_window();
    let monitor = Monitor::new(
        Arc::clone(&collector),
        environment.devices().to_vec(),
        MonitorConfig::enabled(),
    );
    let started_at = Local::now().to_rfc3339();

    info!("Monitoring {} devices for {:?}...", monitor.devices().len(), window);
    let outcome = monitor
        .run(async {
            tokio::time::sleep(window).await;
            Ok::<_, Infallible>(ProbeReport {
                environment,
                started_at,
                window_seconds: window.as_secs_f64(),
                memory_usage: BTreeMap::new(),
                telemetry: None,
            })
        })
        .await;
    let mut report = match outcome {
        Ok(report) => report,
        Err(never) => match never {},
    };
    for device in monitor.devices() {
        let memory_mb = memory_usage(collector.as_ref(), device).await;
        report.memory_usage.insert(device.clone(), memory_mb);
    }

    if let Some(telemetry) = &report.telemetry {
        match telemetry.to_frame() {
            Ok(frame) => println!("{}", frame),
            Err(e) => error!("{}", e),
        }
    }
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to serialize probe report: {}", e),
    }

    info!("Program ended successfully.");
    ExitCode::SUCCESS
}
