//! An in-process provider with no network dependency — useful for tests,
//! for a fixed-response "scripted" agent, or for a future embedded model.

use super::{
    FinishReason, GenerateOptions, InferenceProvider, ProviderCapabilities, ProviderResult, Usage,
};
use crate::types::error::ProviderError;
use async_trait::async_trait;

pub type ResponderFn = dyn Fn(&str) -> Result<String, ProviderError> + Send + Sync;

/// A provider whose `generate` delegates to a plain closure. Production
/// callers wire in a local model; tests wire in a canned responder.
pub struct LocalProvider {
    name: String,
    responder: Box<ResponderFn>,
}

impl LocalProvider {
    pub fn new(name: impl Into<String>, responder: Box<ResponderFn>) -> Self {
        Self {
            name: name.into(),
            responder,
        }
    }

    pub fn echo(name: impl Into<String>) -> Self {
        Self::new(name, Box::new(|prompt| Ok(prompt.to_string())))
    }
}

#[async_trait]
impl InferenceProvider for LocalProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<ProviderResult, ProviderError> {
        let text = (self.responder)(prompt)?;
        let truncated: String = text.chars().take(opts.max_tokens as usize * 4).collect();
        Ok(ProviderResult {
            text: truncated,
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: Usage {
                prompt_tokens: prompt.len() as u32 / 4,
                completion_tokens: text.len() as u32 / 4,
            },
            provider_name: self.name.clone(),
        })
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_tools: false,
            supports_streaming: false,
            max_context_tokens: 8192,
        }
    }
}
