//! Tool registry: registration, lookup, listing, and execution dispatch.

use super::{Tool, ToolCategory};
use crate::types::error::ToolError;
use dashmap::DashMap;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub category: ToolCategory,
    pub requires_permission: bool,
}

/// Carried through every `execute` call: a cancellation signal and a
/// deadline the tool body must honor, chunking long work around it.
#[derive(Clone)]
pub struct ToolExecutionContext {
    pub cancellation: CancellationToken,
    pub deadline: Instant,
    pub correlation_id: Option<crate::types::ids::CorrelationId>,
}

impl ToolExecutionContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancellation: CancellationToken::new(),
            deadline: Instant::now() + timeout,
            correlation_id: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled() || Instant::now() >= self.deadline
    }
}

struct Registration {
    tool: Arc<dyn Tool>,
    schema: JSONSchema,
}

/// Thread-safe tool catalog (C5).
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<DashMap<String, Arc<Registration>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(DashMap::new()),
        }
    }

    /// Registration is idempotent for a name already bound to an
    /// identical definition; any other collision is a typed error.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let definition = tool.definition().clone();
        if let Some(existing) = self.tools.get(&definition.name) {
            let same = serde_json::to_value(existing.tool.definition())
                == serde_json::to_value(&definition);
            return if same {
                Ok(())
            } else {
                Err(ToolError::AlreadyRegistered(definition.name))
            };
        }
        let schema = JSONSchema::compile(&definition.input_schema)
            .map_err(|e| ToolError::InvalidConfig(format!("bad input schema: {e}")))?;
        self.tools
            .insert(definition.name.clone(), Arc::new(Registration { tool, schema }));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|r| r.tool.clone())
    }

    pub fn list(&self, category: Option<ToolCategory>) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|r| r.tool.definition().clone())
            .filter(|d| category.map(|c| c == d.category).unwrap_or(true))
            .collect()
    }

    /// Validates `args` against the tool's declared schema before calling
    /// its body; a validation failure never reaches tool code.
    pub async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, ToolError> {
        let registration = self
            .tools
            .get(name)
            .map(|r| r.clone())
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        if let Err(errors) = registration.schema.validate(&args) {
            let message = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
            return Err(ToolError::Validation(message));
        }

        if ctx.is_cancelled() {
            return Err(ToolError::Aborted);
        }

        registration.tool.execute(args, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
