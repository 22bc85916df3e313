//! The text generation capability seen by the drafter and verifier.
//!
//! Every call is a stateless request/response: the full context travels in
//! the prompt and nothing is remembered between calls.

use async_trait::async_trait;
use gemini::{Gemini, Message, Request};
use thiserror::Error;

/// Failures of a single generation call.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Transport, quota, API status or blocked prompt.
    #[error("generation service fault: {0}")]
    ServiceFault(String),

    /// The service answered but the text is unusable.
    #[error("malformed generation output: {0}")]
    MalformedOutput(String),
}

impl From<gemini::Error> for GenerationError {
    fn from(err: gemini::Error) -> Self {
        GenerationError::ServiceFault(err.to_string())
    }
}

/// Something that turns a prompt into text.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a completion for the prompt.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Per-role generation settings.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    /// Model override; the client default applies when `None`.
    pub model: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: usize,
    /// Ground answers with Google Search.
    pub google_search: bool,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.0,
            max_output_tokens: 8192,
            google_search: false,
        }
    }
}

/// [`Generator`] backed by the Gemini API.
pub struct GeminiGenerator {
    client: Gemini,
    settings: GenerationSettings,
}

impl GeminiGenerator {
    pub fn new(client: Gemini, settings: GenerationSettings) -> Self {
        Self { client, settings }
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let mut request = Request::new(vec![Message::user(prompt)])
            .with_temperature(self.settings.temperature)
            .with_max_output_tokens(self.settings.max_output_tokens)
            .with_google_search(self.settings.google_search);

        if let Some(ref model) = self.settings.model {
            request = request.with_model(model);
        }

        let response = self.client.complete(request).await?;
        let text = response.text();

        if text.trim().is_empty() {
            return Err(GenerationError::MalformedOutput(format!(
                "empty response (finish reason {:?})",
                response.finish_reason
            )));
        }

        tracing::debug!(
            model = %response.model,
            prompt_tokens = response.usage.prompt_tokens,
            output_tokens = response.usage.output_tokens,
            "generation complete"
        );

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_fault_from_client_error() {
        let err: GenerationError = gemini::Error::Api {
            status: 429,
            message: "quota".to_string(),
        }
        .into();
        assert!(matches!(err, GenerationError::ServiceFault(ref m) if m.contains("429")));
    }

    #[tokio::test]
    async fn test_missing_key_is_service_fault() {
        let generator = GeminiGenerator::new(Gemini::new(""), GenerationSettings::default());
        let err = generator.generate("hello").await.unwrap_err();
        assert!(matches!(err, GenerationError::ServiceFault(_)));
    }
}
