use crate::backends::{
    translation_instructions, Backend, GenerationParams, InferenceClient, SUMMARIZATION_INSTRUCTIONS,
};
use crate::environment::EnvironmentKind;
use crate::utils::errors::InferenceError;
use async_trait::async_trait;
use log::debug;
use std::path::PathBuf;
use std::sync::Arc;

const TRANSLATION_SYSTEM: &str = "You are a helpful assistant specialized in translation tasks.";
const SUMMARIZATION_SYSTEM: &str = "You are a helpful assistant specialized in text summarization tasks.";

/// Characters the NPU runtime emits ahead of the completion
const LEADING_NOISE_CHARS: usize = 2;

/// Furiosa NPU serving from compiled model artifacts
pub struct NpuBackend {
    client: Arc<dyn InferenceClient>,
    model_path: PathBuf,
}

impl NpuBackend {
    pub fn new(client: Arc<dyn InferenceClient>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            client,
            model_path: model_path.into(),
        }
    }

    async fn complete(&self, prompt: String, params: GenerationParams) -> Result<String, InferenceError> {
        debug!("Generating from {} ({} prompt chars)", self.model_path.display(), prompt.len());
        let raw = self.client.generate(&prompt, &params).await?;
        Ok(raw.chars().skip(LEADING_NOISE_CHARS).collect())
    }
}

/// Llama 3 chat framing around a single user turn
pub fn chat_template(system: &str, user: &str) -> String {
    format!(
        "<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n{system}<|eot_id|>\
         <|start_header_id|>user<|end_header_id|>\n\n{user}<|eot_id|>\
         <|start_header_id|>assistant<|end_header_id|>"
    )
}

pub fn translation_prompt(text: &str, source_lang: &str, target_lang: &str) -> String {
    let user = format!(
        "{}\n\n{source_lang}: {text}\n\n{target_lang}:",
        translation_instructions(source_lang, target_lang)
    );
    chat_template(TRANSLATION_SYSTEM, &user)
}

pub fn summarization_prompt(text: &str) -> String {
    let user = format!("{SUMMARIZATION_INSTRUCTIONS}\n\nText to summarize:\n{text}\n\nSummary:");
    chat_template(SUMMARIZATION_SYSTEM, &user)
}

#[async_trait]
impl Backend for NpuBackend {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::Npu
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
