//! C4 — Provider Abstraction & Fallback Chain.
//!
//! `InferenceProvider` is a small async trait (`generate`, `capabilities`,
//! typed errors) plus the thermal/memory gating the fallback chain needs.

pub mod chain;
pub mod local;
pub mod remote;

pub use chain::FallbackChain;
pub use local::LocalProvider;
pub use remote::RemoteProvider;

use crate::types::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_ms: u64,
    pub stop: Vec<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.3,
            timeout_ms: 30_000,
            stop: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResult {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub provider_name: String,
}

impl ProviderResult {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Thermal pressure as self-reported by a provider (or its backing host).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThermalStatus {
    Nominal,
    Elevated,
    Critical,
}

/// Memory pressure as self-reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryStatus {
    Nominal,
    Elevated,
    Critical,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub supports_tools: bool,
    pub supports_streaming: bool,
    pub max_context_tokens: u32,
}

/// Uniform provider contract (§4.4). A provider is never assumed to be
/// HTTP-backed; `RemoteProvider` happens to be, `LocalProvider` is not.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        opts: &GenerateOptions,
    ) -> Result<ProviderResult, ProviderError>;

    async fn thermal_status(&self) -> ThermalStatus {
        ThermalStatus::Nominal
    }

    async fn memory_status(&self) -> MemoryStatus {
        MemoryStatus::Nominal
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::default()
    }
}

/// Clamp `maxTokens` to the configured safety ceiling regardless of caller (§4.4 Cap).
pub fn clamp_max_tokens(requested: u32, ceiling: u32) -> u32 {
    requested.min(ceiling)
}
