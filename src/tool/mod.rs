//! C5 — Tool Registry & Mapper.

pub mod builtin;
pub mod mapper;
pub mod registry;

pub use mapper::{ToolMapper, ToolMappingResult, UnknownToolRequest};
pub use registry::{ToolDefinition, ToolExecutionContext, ToolRegistry};

use crate::types::error::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolCategory {
    Shell,
    File,
    Search,
    Data,
    Visualization,
    Ml,
    Notebook,
    Web,
    Task,
    Generic,
}

/// A registered tool's executable body.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> &ToolDefinition;

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, ToolError>;
}
