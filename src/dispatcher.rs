use crate::backends::{Backend, ClientFactory, GpuBackend, NpuBackend};
use crate::collectors::{FuriosaNpu, NvidiaGpu, PowerCollector};
use crate::environment::{detect_environment, EnvironmentDescriptor, EnvironmentKind};
use crate::metrics::{calculate_tps, count_tokens};
use crate::monitor::{Monitor, MonitorConfig};
use crate::telemetry::{Telemetry, TelemetrySink};
use crate::utils::errors::HarnessError;
use log::{debug, error, info};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;

pub const DEFAULT_NPU_DEVICES: &str = "npu:1:*";
pub const DEFAULT_NPU_MODEL_PATH: &str = "Llama-3.1-8B-Instruct";

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub monitor: MonitorConfig,
    /// Compiled artifacts loaded when an NPU is detected
    pub npu_model_path: PathBuf,
    /// Device selector handed to the NPU runtime
    pub npu_devices: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            npu_model_path: PathBuf::from(DEFAULT_NPU_MODEL_PATH),
            npu_devices: DEFAULT_NPU_DEVICES.to_string(),
        }
    }
}

impl DispatcherConfig {
    /// Defaults overridden by `NPU_MODEL_PATH` and `NPU_DEVICES`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("NPU_MODEL_PATH") {
            config.npu_model_path = PathBuf::from(path);
        }
        if let Ok(devices) = std::env::var("NPU_DEVICES") {
            config.npu_devices = devices;
        }
        config
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationRecord {
    pub translation: String,
    /// Seconds spent on this item
    pub elapsed_time: f64,
    /// Words in the completion
    pub tokens: usize,
    /// Completion tokens per second
    pub tps: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRecord {
    pub summary: String,
    pub elapsed_time: f64,
    pub tokens: usize,
    pub tps: f64,
}

/// Result of [`Dispatcher::batch_translate_text`]. `telemetry` is only set
/// when the whole batch runs under a [`Monitor`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchTranslation {
    pub translations: Vec<TranslationRecord>,
    #[serde(flatten)]
    pub telemetry: Option<Telemetry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub summaries: Vec<SummaryRecord>,
    #[serde(flatten)]
    pub telemetry: Option<Telemetry>,
}

impl TelemetrySink for BatchTranslation {
    fn attach_telemetry(&mut self, telemetry: Telemetry) {
        self.telemetry = Some(telemetry);
    }
}

impl TelemetrySink for BatchSummary {
    fn attach_telemetry(&mut self, telemetry: Telemetry) {
        self.telemetry = Some(telemetry);
    }
}

/// Backend resolved by the first successful [`Dispatcher::initialize`]
struct Binding {
    environment: EnvironmentDescriptor,
    model: String,
    backend: Arc<dyn Backend>,
    monitor: Monitor,
}

/// Routes translation and summarization to the accelerator found on this host.
///
/// Starts unbound; [`initialize`](Self::initialize) detects the environment
/// once and binds a backend for the lifetime of the dispatcher. Every task
/// call goes through a [`Monitor`] over the detected devices.
pub struct Dispatcher {
    gpu_collector: Arc<dyn PowerCollector>,
    npu_collector: Arc<dyn PowerCollector>,
    clients: Arc<dyn ClientFactory>,
    config: DispatcherConfig,
    binding: OnceCell<Binding>,
}

impl Dispatcher {
    /// Dispatcher probing real hardware through `nvidia-smi` and `furiosa-smi`
    pub fn new(clients: Arc<dyn ClientFactory>, config: DispatcherConfig) -> Self {
        Self::with_collectors(
            Arc::new(NvidiaGpu::new()),
            Arc::new(FuriosaNpu::new()),
            clients,
            config,
        )
    }

    pub fn with_collectors(
        gpu_collector: Arc<dyn PowerCollector>,
        npu_collector: Arc<dyn PowerCollector>,
        clients: Arc<dyn ClientFactory>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            gpu_collector,
            npu_collector,
            clients,
            config,
            binding: OnceCell::new(),
        }
    }

    /// Detect the accelerator and bind a backend. A no-op once bound, even
    /// with a different `model_id`. On failure the dispatcher stays unbound.
    pub async fn initialize(&self, model_id: &str) -> Result<(), HarnessError> {
        if let Some(binding) = self.binding.get() {
            debug!(
                "Already bound to {} on {}, ignoring initialize({})",
                binding.model,
                binding.backend.kind(),
                model_id
            );
            return Ok(());
        }

        self.binding.get_or_try_init(|| self.bind(model_id)).await?;
        Ok(())
    }

    async fn bind(&self, model_id: &str) -> Result<Binding, HarnessError> {
        let environment =
            detect_environment(self.gpu_collector.as_ref(), self.npu_collector.as_ref()).await;

        let (backend, collector, model): (Arc<dyn Backend>, Arc<dyn PowerCollector>, String) =
            match environment.kind() {
                EnvironmentKind::Gpu => {
                    let client = self.clients.gpu_client(model_id)?;
                    info!("Environment detected: GPU. Using GPU with model {}.", model_id);
                    (
                        Arc::new(GpuBackend::new(client, model_id)) as Arc<dyn Backend>,
                        Arc::clone(&self.gpu_collector),
                        model_id.to_string(),
                    )
                }
                EnvironmentKind::Npu => {
                    let path = &self.config.npu_model_path;
                    let client = self.clients.npu_client(path, &self.config.npu_devices)?;
                    info!(
                        "Environment detected: Furiosa NPU. Using {} on {}.",
                        path.display(),
                        self.config.npu_devices
                    );
                    (
                        Arc::new(NpuBackend::new(client, path.clone())) as Arc<dyn Backend>,
                        Arc::clone(&self.npu_collector),
                        path.display().to_string(),
                    )
                }
                EnvironmentKind::Unknown => {
                    let message = "No suitable environment detected. \
                        Ensure that either a CUDA-enabled GPU or Furiosa NPU is properly configured.";
                    error!("{}", message);
                    return Err(HarnessError::Environment(message.to_string()));
                }
            };

        let monitor = Monitor::new(collector, environment.devices().to_vec(), self.config.monitor.clone());
        Ok(Binding {
            environment,
            model,
            backend,
            monitor,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.binding.initialized()
    }

    pub fn environment(&self) -> Option<&EnvironmentDescriptor> {
        self.binding.get().map(|b| &b.environment)
    }

    /// Model id (GPU) or artifact path (NPU) of the bound backend
    pub fn bound_model(&self) -> Option<&str> {
        self.binding.get().map(|b| b.model.as_str())
    }

    fn binding(&self, task: &str) -> Result<&Binding, HarnessError> {
        self.binding.get().ok_or_else(|| {
            HarnessError::NotInitialized(format!(
                "{task} environment not initialized. Call initialize first."
            ))
        })
    }

    pub async fn translate_text(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String, HarnessError> {
        let binding = self.binding("Translation")?;
        let translation = binding
            .monitor
            .run(binding.backend.translate(text, source_language, target_language))
            .await?;
        Ok(translation)
    }

    pub async fn summarize_text(&self, text: &str) -> Result<String, HarnessError> {
        let binding = self.binding("Summarization")?;
        let summary = binding.monitor.run(binding.backend.summarize(text)).await?;
        Ok(summary)
    }

    /// Translate `texts` one after another, timing each item and its throughput.
    pub async fn batch_translate_text<S: AsRef<str>>(
        &self,
        texts: &[S],
        source_language: &str,
        target_language: &str,
    ) -> Result<BatchTranslation, HarnessError> {
        let mut translations = Vec::with_capacity(texts.len());
        for text in texts {
            let start = Instant::now();
            let translation = self
                .translate_text(text.as_ref(), source_language, target_language)
                .await?;
            let elapsed = start.elapsed();
            let tokens = count_tokens(&translation);
            translations.push(TranslationRecord {
                translation,
                elapsed_time: elapsed.as_secs_f64(),
                tokens,
                tps: calculate_tps(elapsed, tokens as i64)?,
            });
        }

        Ok(BatchTranslation {
            translations,
            telemetry: None,
        })
    }

    /// Summarize `texts` one after another, timing each item.
    pub async fn batch_summarize_text<S: AsRef<str>>(&self, texts: &[S]) -> Result<BatchSummary, HarnessError> {
        let mut summaries = Vec::with_capacity(texts.len());
        for text in texts {
            let start = Instant::now();
            let summary = self.summarize_text(text.as_ref()).await?;
            let elapsed = start.elapsed();
            let tokens = count_tokens(&summary);
            summaries.push(SummaryRecord {
                summary,
                elapsed_time: elapsed.as_secs_f64(),
                tokens,
                tps: calculate_tps(elapsed, tokens as i64)?,
            });
        }

        Ok(BatchSummary {
            summaries,
            telemetry: None,
        })
    }
}
