//! Structured-extraction boundary to the language model
//!
//! Every model call in the pipeline goes through [`StructuredExtractor`]:
//! the caller declares the output type, and the boundary returns a value of
//! that type that has already been schema-checked and validated.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::providers::openai;
use schemars::JsonSchema;
use serde::{Serialize, de::DeserializeOwned};

/// Output types that can be requested from the model.
pub trait StructuredOutput: JsonSchema + DeserializeOwned + Serialize + Send + Sync + 'static {
    /// Semantic checks beyond the schema. An `Err` fails the call.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// A single structured-extraction call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
}

impl ExtractionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            temperature: None,
        }
    }

    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum LlmError {
    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),

    #[error("LLM extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("LLM output failed validation: {0}")]
    InvalidOutput(String),
}

#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    async fn extract<T: StructuredOutput>(&self, request: ExtractionRequest) -> Result<T, LlmError>;

    fn model_name(&self) -> &str;
}

/// OpenAI-backed extractor bound to one model
#[derive(Clone)]
pub struct LlmClient {
    client: openai::Client,
    model: String,
    timeout: Duration,
}

impl LlmClient {
    /// Create a new LLM client with the provided API key
    pub fn new(api_key: &str, model: &str, timeout: Duration) -> Result<Self, String> {
        let client = openai::Client::new(api_key)
            .map_err(|e| format!("Failed to create OpenAI client: {}", e))?;

        Ok(Self {
            client,
            model: model.to_string(),
            timeout,
        })
    }

    /// Same connection, different model
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            client: self.client.clone(),
            model: model.to_string(),
            timeout: self.timeout,
        }
    }
}

#[async_trait]
impl StructuredExtractor for LlmClient {
    async fn extract<T: StructuredOutput>(&self, request: ExtractionRequest) -> Result<T, LlmError> {
        let start_time = Instant::now();
        let prompt_length = request.prompt.len();

        let mut builder = self.client.extractor::<T>(&self.model);
        if let Some(system_prompt) = request.system_prompt.as_deref() {
            builder = builder.preamble(system_prompt);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.additional_params(serde_json::json!({ "temperature": temperature }));
        }
        let extractor = builder.build();

        let output = match tokio::time::timeout(self.timeout, extractor.extract(&request.prompt)).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::error!(
                    model = %self.model,
                    elapsed_ms = start_time.elapsed().as_millis(),
                    prompt_length = prompt_length,
                    error = %e,
                    "OpenAI structured extraction failed"
                );
                return Err(LlmError::ExtractionFailed(e.to_string()));
            }
            Err(_) => {
                tracing::error!(
                    model = %self.model,
                    timeout_secs = self.timeout.as_secs(),
                    prompt_length = prompt_length,
                    "OpenAI structured extraction timed out"
                );
                return Err(LlmError::Timeout(self.timeout));
            }
        };

        output.validate().map_err(LlmError::InvalidOutput)?;

        tracing::debug!(
            model = %self.model,
            elapsed_ms = start_time.elapsed().as_millis(),
            prompt_length = prompt_length,
            "OpenAI structured extraction completed"
        );

        Ok(output)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
