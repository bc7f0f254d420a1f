//! An HTTP-backed provider. The chain does not assume any provider is
//! HTTP-backed (§4.5); this is simply the one concrete implementation that
//! is.

use super::{
    FinishReason, GenerateOptions, InferenceProvider, MemoryStatus, ProviderCapabilities,
    ProviderResult, ThermalStatus, Usage,
};
use crate::types::error::ProviderError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

pub struct RemoteProvider {
    name: String,
    endpoint: String,
    client: reqwest::Client,
}

impl RemoteProvider {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }

    fn classify_status(status: reqwest::StatusCode) -> ProviderError {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ProviderError::RateLimited {
                retry_after_ms: None,
            }
        } else if status.is_client_error() {
            ProviderError::BadRequest(format!("status {status}"))
        } else if status.is_server_error() {
            ProviderError::Server(format!("status {status}"))
        } else {
            ProviderError::Unknown(format!("status {status}"))
        }
    }
}

#[derive(Deserialize)]
struct RemoteResponse {
    text: String,
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl InferenceProvider for RemoteProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<ProviderResult, ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(Duration::from_millis(opts.timeout_ms))
            .json(&serde_json::json!({
                "prompt": prompt,
                "max_tokens": opts.max_tokens,
                "temperature": opts.temperature,
                "stop": opts.stop,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Unavailable(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(Self::classify_status(response.status()));
        }

        let body: RemoteResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Validation(e.to_string()))?;

        Ok(ProviderResult {
            text: body.text,
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: Usage {
                prompt_tokens: body.prompt_tokens,
                completion_tokens: body.completion_tokens,
            },
            provider_name: self.name.clone(),
        })
    }

    async fn thermal_status(&self) -> ThermalStatus {
        ThermalStatus::Nominal
    }

    async fn memory_status(&self) -> MemoryStatus {
        MemoryStatus::Nominal
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_tools: true,
            supports_streaming: false,
            max_context_tokens: 32_768,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit_status() {
        assert!(matches!(
            RemoteProvider::classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS),
            ProviderError::RateLimited { .. }
        ));
    }

    #[test]
    fn classifies_server_error_as_retryable() {
        let err = RemoteProvider::classify_status(reqwest::StatusCode::BAD_GATEWAY);
        assert!(err.is_retryable());
    }

    #[test]
    fn classifies_client_error_as_non_retryable() {
        let err = RemoteProvider::classify_status(reqwest::StatusCode::BAD_REQUEST);
        assert!(!err.is_retryable());
    }
}
