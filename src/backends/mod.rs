pub mod gpu;
pub mod npu;

pub use gpu::GpuBackend;
pub use npu::NpuBackend;

use crate::environment::EnvironmentKind;
use crate::utils::errors::{HarnessError, InferenceError};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Sampling settings passed with every generation request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout: Duration,
}

impl GenerationParams {
    pub fn translation() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 200,
            request_timeout: Duration::from_secs(600),
        }
    }

    pub fn summarization() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 300,
            request_timeout: Duration::from_secs(600),
        }
    }
}

/// A loaded model that turns a prompt into text
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, InferenceError>;
}

/// Builds inference clients for the backend picked at initialization.
pub trait ClientFactory: Send + Sync {
    /// Client serving `model_id` on the GPU runtime
    fn gpu_client(&self, model_id: &str) -> Result<Arc<dyn InferenceClient>, HarnessError>;

    /// Client loading compiled artifacts from `model_path` onto `devices` (e.g. `npu:1:*`)
    fn npu_client(&self, model_path: &Path, devices: &str) -> Result<Arc<dyn InferenceClient>, HarnessError>;
}

/// Translation and summarization on one accelerator family
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> EnvironmentKind;

    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String, InferenceError>;

    async fn summarize(&self, text: &str) -> Result<String, InferenceError>;
}

pub(crate) fn translation_instructions(source_lang: &str, target_lang: &str) -> String {
    format!(
        "This is an {source_lang} to {target_lang} translation, please provide a single {target_lang} \
         translation for this text in as polite a tone as possible. Do not provide any explanations or \
         text apart from the translation.\nThe translation result must be written in {target_lang}."
    )
}

pub(crate) const SUMMARIZATION_INSTRUCTIONS: &str = "Please summarize the following text in a concise and clear manner. \
The summary should focus on the main points without adding any additional interpretation or information.";

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records prompts and answers with a canned completion.
    #[derive(Default)]
    pub struct RecordingClient {
        pub completion: String,
        pub latency: Duration,
        pub prompts: Mutex<Vec<(String, GenerationParams)>>,
    }

    impl RecordingClient {
        pub fn answering(completion: &str) -> Self {
            Self {
                completion: completion.to_string(),
                ..Self::default()
            }
        }

        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        pub fn last_prompt(&self) -> (String, GenerationParams) {
            self.prompts.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl InferenceClient for RecordingClient {
        async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, InferenceError> {
            self.prompts.lock().unwrap().push((prompt.to_string(), params.clone()));
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            Ok(self.completion.clone())
        }
    }
}
