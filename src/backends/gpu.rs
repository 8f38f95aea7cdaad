use crate::backends::{
    translation_instructions, Backend, GenerationParams, InferenceClient, SUMMARIZATION_INSTRUCTIONS,
};
use crate::environment::EnvironmentKind;
use crate::utils::errors::InferenceError;
use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

/// GPU serving through a model server addressed by model id.
/// Requests are bounded by [`GenerationParams::request_timeout`].
pub struct GpuBackend {
    client: Arc<dyn InferenceClient>,
    model_id: String,
}

impl GpuBackend {
    pub fn new(client: Arc<dyn InferenceClient>, model_id: impl Into<String>) -> Self {
        Self {
            client,
            model_id: model_id.into(),
        }
    }

    async fn complete(&self, prompt: String, params: GenerationParams) -> Result<String, InferenceError> {
        debug!("Generating with {} ({} prompt chars)", self.model_id, prompt.len());
        tokio::time::timeout(params.request_timeout, self.client.generate(&prompt, &params))
            .await
            .map_err(|_| InferenceError::Timeout(params.request_timeout))?
    }
}

pub fn translation_prompt(text: &str, source_lang: &str, target_lang: &str) -> String {
    format!(
        "{}\n\n{source_lang}: {text}\n\n{target_lang}:\n",
        translation_instructions(source_lang, target_lang)
    )
}

pub fn summarization_prompt(text: &str) -> String {
    format!("{SUMMARIZATION_INSTRUCTIONS}\n\nText to summarize:\n{text}\n\nSummary:\n")
}

#[async_trait]
impl Backend for GpuBackend {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::Gpu
    }

    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String, InferenceError> {
        self.complete(
            translation_prompt(text, source_lang, target_lang),
            GenerationParams::translation(),
        )
        .await
    }

    async fn summarize(&self, text: &str) -> Result<String, InferenceError> {
        self.complete(summarization_prompt(text), GenerationParams::summarization())
            .await
    }
}
