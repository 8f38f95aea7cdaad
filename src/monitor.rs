use crate::collectors::{DeviceId, PowerCollector};
use crate::telemetry::{PowerTrace, TelemetrySink};
use futures::FutureExt;
use itertools::Itertools;
use log::{debug, error};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Environment variable that switches monitoring on
pub const MONITORING_ENV: &str = "ENABLE_MONITORING";
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitoringToggle {
    /// Read the named environment variable on every monitored call
    Env(String),
    Enabled,
    Disabled,
}

impl MonitoringToggle {
    pub fn is_enabled(&self) -> bool {
        match self {
            MonitoringToggle::Env(name) => std::env::var(name)
                .map(|value| is_truthy(&value))
                .unwrap_or(false),
            MonitoringToggle::Enabled => true,
            MonitoringToggle::Disabled => false,
        }
    }
}

/// Case-insensitive `true`, `1`, `yes` or `on`.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub toggle: MonitoringToggle,
    /// Pause between sampling rounds
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            toggle: MonitoringToggle::Env(MONITORING_ENV.to_string()),
            interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

impl MonitorConfig {
    pub fn enabled() -> Self {
        Self {
            toggle: MonitoringToggle::Enabled,
            ..Self::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            toggle: MonitoringToggle::Disabled,
            ..Self::default()
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Wraps units of work with a background power sampler.
///
/// Each [`Monitor::run`] gets its own sampler task and a fresh [`PowerTrace`];
/// the sampler is stopped and joined before `run` returns, whether the work
/// succeeds, fails or panics.
///
/// The sampler is a spawned tokio task. Work that blocks its thread (a
/// synchronous inference call) only gets sampled on a multi-thread runtime;
/// on `current_thread` the sampler runs only while the work yields.
#[derive(Clone)]
pub struct Monitor {
    collector: Arc<dyn PowerCollector>,
    devices: Vec<DeviceId>,
    config: MonitorConfig,
}

impl Monitor {
    /// Repeated ids in `devices` are sampled once per round.
    pub fn new(collector: Arc<dyn PowerCollector>, devices: Vec<DeviceId>, config: MonitorConfig) -> Self {
        Self {
            collector,
            devices: devices.into_iter().unique().collect(),
            config,
        }
    }

    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    /// Run `work`, sampling power for its whole duration when monitoring is on.
    ///
    /// Errors and panics from `work` reach the caller unchanged. On success the
    /// aggregated telemetry is handed to the output's [`TelemetrySink`].
    pub async fn run<Fut, T, E>(&self, work: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        T: TelemetrySink,
    {
        if !self.config.toggle.is_enabled() {
            return work.await;
        }

        let sampler = Sampler::commence(
            Arc::clone(&self.collector),
            self.devices.clone(),
            self.config.interval,
        );
        let outcome = AssertUnwindSafe(work).catch_unwind().await;
        let trace = sampler.shutdown().await;

        let mut output = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(e),
            Err(panic) => std::panic::resume_unwind(panic),
        };

        let telemetry = trace.into_telemetry();
        debug!(
            "Monitored call drew {:.2} W in total across {} devices",
            telemetry.total_power.absolute,
            telemetry.power_data.len()
        );
        output.attach_telemetry(telemetry);
        Ok(output)
    }
}

/// Background sampling task for one monitored call
struct Sampler {
    is_running: Arc<AtomicBool>,
    task_handle: Option<JoinHandle<PowerTrace>>,
}

impl Sampler {
    fn commence(collector: Arc<dyn PowerCollector>, devices: Vec<DeviceId>, interval: Duration) -> Self {
        let is_running = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(run_sampling_loop(
            collector,
            devices,
            Arc::clone(&is_running),
            interval,
        ));

        Self {
            is_running,
            task_handle: Some(handle),
        }
    }

    /// Signal the loop and wait for it to hand back its samples
    async fn shutdown(mut self) -> PowerTrace {
        self.is_running.store(false, Ordering::Relaxed);
        let Some(handle) = self.task_handle.take() else {
            return PowerTrace::default();
        };
        match handle.await {
            Ok(trace) => trace,
            Err(e) => {
                error!("Power sampler terminated abnormally: {}", e);
                PowerTrace::default()
            }
        }
    }
}

impl Drop for Sampler {
    // Covers a `run` future dropped mid-flight.
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::Relaxed);
    }
}

async fn run_sampling_loop(
    collector: Arc<dyn PowerCollector>,
    devices: Vec<DeviceId>,
    is_running: Arc<AtomicBool>,
    interval: Duration,
) -> PowerTrace {
    let start = Instant::now();
    let mut trace = PowerTrace::new(&devices);
    let mut iteration = 0usize;

    while is_running.load(Ordering::Relaxed) {
        iteration += 1;
        for device in &devices {
            let watts = match collector.query_power(device).await {
                Ok(watts) => watts,
                Err(e) => {
                    error!("Error calculating power consumption for {}: {}", device, e);
                    0.0
                }
            };
            trace.record(device, start.elapsed().as_secs_f64(), watts);
        }
        tokio::time::sleep(interval).await;
    }

    debug!("Power sampler stopped after {} iterations", iteration);
    trace
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::DummyCollector;
    use serde_json::{Map, Value};

    fn dummy(devices: &[(&str, f64)]) -> Arc<DummyCollector> {
        Arc::new(DummyCollector::new(
            devices.iter().map(|(id, w)| (DeviceId::from(*id), *w)).collect(),
        ))
    }

    fn monitor(collector: &Arc<DummyCollector>, config: MonitorConfig) -> Monitor {
        Monitor::new(collector.clone(), collector.device_ids(), config)
    }

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy("true"));
        assert!(is_truthy("TRUE"));
        assert!(is_truthy(" On "));
        assert!(is_truthy("1"));
        assert!(!is_truthy("false"));
        assert!(!is_truthy(""));
        assert!(!is_truthy("enabled-ish"));
    }

    #[test]
    fn test_env_toggle() {
        let name = "ACCEL_BENCH_TEST_MONITORING_TOGGLE";
        let toggle = MonitoringToggle::Env(name.to_string());
        assert!(!toggle.is_enabled());

        unsafe { std::env::set_var(name, "True") };
        assert!(toggle.is_enabled());
        unsafe { std::env::set_var(name, "no") };
        assert!(!toggle.is_enabled());
        unsafe { std::env::remove_var(name) };
    }

    #[tokio::test]
    async fn test_disabled_is_pass_through() {
        let collector = dummy(&[("cuda:0", 50.0)]);
        let monitor = monitor(&collector, MonitorConfig::disabled());

        let mut expected = Map::new();
        expected.insert("summary".to_string(), Value::from("short"));

        let result: Result<Map<String, Value>, String> = monitor.run(async { Ok(expected.clone()) }).await;

        assert_eq!(result.unwrap(), expected);
        assert_eq!(collector.power_queries(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sampling_cadence() {
        let collector = dummy(&[("cuda:0", 50.0)]);
        let monitor = monitor(&collector, MonitorConfig::enabled());

        let output: Map<String, Value> = monitor
            .run(async {
                tokio::time::sleep(Duration::from_millis(350)).await;
                Ok::<_, String>(Map::new())
            })
            .await
            .unwrap();

        let timings: Vec<f64> = output["timing_data"]["cuda:0"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_f64().unwrap())
            .collect();
        assert!((3..=4).contains(&timings.len()), "got {:?}", timings);
        assert!(timings.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(timings.iter().all(|t| *t < 0.4));
        assert_eq!(output["power_data"]["cuda:0"].as_array().unwrap().len(), timings.len());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_relative_shares_across_devices() {
        let collector = dummy(&[("npu0", 30.0), ("npu1", 10.0)]);
        let monitor = monitor(&collector, MonitorConfig::enabled());

        let output: Map<String, Value> = monitor
            .run(async {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok::<_, String>(Map::new())
            })
            .await
            .unwrap();

        let relative = output["total_power"]["relative"].as_object().unwrap();
        let npu0 = relative["npu0"].as_f64().unwrap();
        let npu1 = relative["npu1"].as_f64().unwrap();
        assert!((npu0 + npu1 - 1.0).abs() < 1e-9);
        assert!((npu0 - 0.75).abs() < 1e-9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_repeated_devices_keep_shares_consistent() {
        let collector = dummy(&[("npu0", 40.0), ("npu1", 10.0)]);
        let watched = vec![DeviceId::from("npu0"), DeviceId::from("npu0"), DeviceId::from("npu1")];
        let monitor = Monitor::new(collector.clone(), watched, MonitorConfig::enabled());
        assert_eq!(monitor.devices().len(), 2);

        let output: Map<String, Value> = monitor
            .run(async {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok::<_, String>(Map::new())
            })
            .await
            .unwrap();

        let npu0 = output["power_data"]["npu0"].as_array().unwrap();
        let npu1 = output["power_data"]["npu1"].as_array().unwrap();
        assert!(!npu0.is_empty());
        assert_eq!(npu0.len(), npu1.len());
        assert_eq!(collector.power_queries(), npu0.len() * 2);

        let relative = output["total_power"]["relative"].as_object().unwrap();
        let shares: f64 = relative.values().map(|v| v.as_f64().unwrap()).sum();
        assert!((shares - 1.0).abs() < 1e-9);
        assert!((relative["npu0"].as_f64().unwrap() - 0.8).abs() < 1e-9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_work_is_sampled_on_multi_thread_runtime() {
        let collector = dummy(&[("cuda:0", 50.0)]);
        let monitor = monitor(&collector, MonitorConfig::enabled());

        let output: Map<String, Value> = monitor
            .run(async {
                std::thread::sleep(Duration::from_millis(150));
                Ok::<_, String>(Map::new())
            })
            .await
            .unwrap();

        assert!(!output["power_data"]["cuda:0"].as_array().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_error_propagates_and_sampler_stops() {
        let collector = dummy(&[("cuda:0", 50.0)]);
        let monitor = monitor(&collector, MonitorConfig::enabled());

        let result: Result<String, String> = monitor
            .run(async {
                tokio::time::sleep(Duration::from_millis(120)).await;
                Err("generation failed".to_string())
            })
            .await;

        assert_eq!(result, Err("generation failed".to_string()));
        let queries = collector.power_queries();
        assert!(queries > 0);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(collector.power_queries(), queries);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panic_propagates_and_sampler_stops() {
        let collector = dummy(&[("cuda:0", 50.0)]);
        let monitor = monitor(&collector, MonitorConfig::enabled());

        let crash = true;
        let joined = tokio::spawn(async move {
            monitor
                .run(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    if crash {
                        panic!("inference backend crashed");
                    }
                    Ok::<String, String>(String::new())
                })
                .await
        })
        .await;

        let err = joined.unwrap_err();
        assert!(err.is_panic());
        let queries = collector.power_queries();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(collector.power_queries(), queries);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failing_power_queries_record_zero() {
        let collector = Arc::new(DummyCollector::failing(vec![DeviceId::from("npu0")]));
        let monitor = Monitor::new(collector.clone(), collector.device_ids(), MonitorConfig::enabled());

        let output: Map<String, Value> = monitor
            .run(async {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok::<_, String>(Map::new())
            })
            .await
            .unwrap();

        assert_eq!(output["total_power"]["absolute"], 0.0);
        assert_eq!(output["total_power"]["relative"]["npu0"], 0.0);
        assert!(output["power_data"]["npu0"]
            .as_array()
            .unwrap()
            .iter()
            .all(|w| w.as_f64() == Some(0.0)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_string_output_unchanged_when_enabled() {
        let collector = dummy(&[("cuda:0", 50.0)]);
        let monitor = monitor(&collector, MonitorConfig::enabled());

        let output = monitor
            .run(async { Ok::<_, String>("안녕하세요 -> Hello".to_string()) })
            .await
            .unwrap();

        assert_eq!(output, "안녕하세요 -> Hello");
    }
}
