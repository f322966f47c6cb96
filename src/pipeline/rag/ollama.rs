use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::GenerationService;
use super::ServiceError;
use crate::config::ServiceConfig;

/// Generation backed by a local Ollama instance (`/api/generate`).
pub struct OllamaGenerator {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaGenerator {
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self, ServiceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ServiceError::Unavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn from_config(services: &ServiceConfig) -> Result<Self, ServiceError> {
        Self::new(
            &services.ollama_url,
            &services.ollama_model,
            services.ollama_timeout_secs,
        )
    }

    /// Connect only if the configured model is actually pulled.
    pub fn with_available_model(services: &ServiceConfig) -> Option<Self> {
        let generator = match Self::from_config(services) {
            Ok(g) => g,
            Err(e) => {
                tracing::debug!(error = %e, "Ollama generator: client setup failed");
                return None;
            }
        };
        match generator.is_model_available() {
            Ok(true) => {
                tracing::info!(model = %generator.model, "Ollama generator: model confirmed");
                Some(generator)
            }
            Ok(false) => {
                tracing::debug!(model = %generator.model, "Ollama generator: model not available");
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "Ollama generator: cannot reach Ollama");
                None
            }
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_model_available(&self) -> Result<bool, ServiceError> {
        let models = self.list_models()?;
        Ok(models.iter().any(|m| m.starts_with(&self.model)))
    }

    pub fn list_models(&self) -> Result<Vec<String>, ServiceError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| ServiceError::from_reqwest(e, &self.base_url, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ServiceError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaTagsResponse = response
            .json()
            .map_err(|e| ServiceError::ResponseParsing(e.to_string()))?;

        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Response body from Ollama /api/tags
#[derive(Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

impl GenerationService for OllamaGenerator {
    fn generate(&self, system: &str, prompt: &str) -> Result<String, ServiceError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt,
            system,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| ServiceError::from_reqwest(e, &self.base_url, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ServiceError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .map_err(|e| ServiceError::ResponseParsing(e.to_string()))?;

        Ok(parsed.response)
    }
}
