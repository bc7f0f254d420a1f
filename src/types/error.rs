//! Layered error taxonomy for the agent runtime core.
//!
//! `RuntimeError` is composed by `#[from]` over per-component error enums.
//! Every variant maps to one of a small set of error "kinds":
//! `validation`, `timeout`, `cancelled`, `rate_limited`, `busy`,
//! `circuit_open`, `provider_unavailable`, `tool_not_found`,
//! `tool_execution_failed`, `security_violation`, `budget_exceeded`,
//! `not_supported`, `internal`.

use super::{AgentId, CorrelationId, RequestId, TaskId};
use thiserror::Error;

/// Top-level runtime error. Every sub-error composes into this via `#[from]`.
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("event bus error: {0}")]
    Bus(#[from] BusError),

    #[error("circuit error: {0}")]
    Circuit(#[from] CircuitError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("agent runtime error: {0}")]
    Agent(#[from] AgentError),

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// The error's taxonomy kind, used on the wire and in `agent.failed` events.
    pub fn code(&self) -> &'static str {
        match self {
            RuntimeError::Store(e) => e.code(),
            RuntimeError::Bus(e) => e.code(),
            RuntimeError::Circuit(e) => e.code(),
            RuntimeError::Provider(e) => e.code(),
            RuntimeError::Tool(e) => e.code(),
            RuntimeError::Dispatch(_) => "not_supported",
            RuntimeError::Agent(e) => e.code(),
            RuntimeError::Orchestrator(_) => "internal",
            RuntimeError::Audit(_) => "internal",
            RuntimeError::Session(e) => e.code(),
            RuntimeError::Config(_) => "validation",
            RuntimeError::Internal(_) => "internal",
        }
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        None
    }
}

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("store is destroyed")]
    Destroyed,
    #[error("rate limited: key {key} may retry in {retry_after_ms}ms")]
    RateLimited { key: String, retry_after_ms: u64 },
}

impl StoreError {
    fn code(&self) -> &'static str {
        match self {
            StoreError::Destroyed => "internal",
            StoreError::RateLimited { .. } => "rate_limited",
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum BusError {
    #[error("bus is shutting down")]
    ShuttingDown,
    #[error("handler failed for subscription: {reason}")]
    HandlerFailed { reason: String },
}

impl BusError {
    fn code(&self) -> &'static str {
        match self {
            BusError::ShuttingDown => "internal",
            BusError::HandlerFailed { .. } => "internal",
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum CircuitError {
    #[error("circuit open for resource '{resource}': recovery in {recovery_remaining_ms}ms")]
    Open {
        resource: String,
        recovery_remaining_ms: u64,
    },
    #[error("call to '{resource}' timed out after {timeout_ms}ms")]
    Timeout { resource: String, timeout_ms: u64 },
}

impl CircuitError {
    fn code(&self) -> &'static str {
        match self {
            CircuitError::Open { .. } => "circuit_open",
            CircuitError::Timeout { .. } => "timeout",
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("provider call timed out")]
    Timeout,
    #[error("provider rate limited{}", retry_after_ms.map(|ms| format!(", retry after {ms}ms")).unwrap_or_default())]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("server error: {0}")]
    Server(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("chain refused new work: global in-flight cap exceeded")]
    Busy,
    #[error("unknown provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    fn code(&self) -> &'static str {
        match self {
            ProviderError::Timeout => "timeout",
            ProviderError::RateLimited { .. } => "rate_limited",
            ProviderError::BadRequest(_) => "validation",
            ProviderError::Server(_) => "provider_unavailable",
            ProviderError::Unavailable(_) => "provider_unavailable",
            ProviderError::Validation(_) => "validation",
            ProviderError::Busy => "busy",
            ProviderError::Unknown(_) => "internal",
        }
    }

    /// Retryable errors are absorbed by the fallback chain's retry/backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout
                | ProviderError::Server(_)
                | ProviderError::Unavailable(_)
                | ProviderError::RateLimited { .. }
        )
    }
}

#[derive(Error, Debug, Clone)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("tool already registered: {0}")]
    AlreadyRegistered(String),
    #[error("input validation failed: {0}")]
    Validation(String),
    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),
    #[error("tool call aborted")]
    Aborted,
    #[error("security violation: {0}")]
    SecurityViolation(String),
    #[error("invalid mapper configuration: {0}")]
    InvalidConfig(String),
}

impl ToolError {
    fn code(&self) -> &'static str {
        match self {
            ToolError::NotFound(_) => "tool_not_found",
            ToolError::AlreadyRegistered(_) => "validation",
            ToolError::Validation(_) => "validation",
            ToolError::ExecutionFailed(_) => "tool_execution_failed",
            ToolError::Aborted => "cancelled",
            ToolError::SecurityViolation(_) => "security_violation",
            ToolError::InvalidConfig(_) => "validation",
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    #[error("no agent satisfies required capabilities: {0:?}")]
    NoCandidate(Vec<String>),
    #[error("no decision recorded for request {0}")]
    DecisionNotFound(RequestId),
}

#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("budget exceeded: {reason}")]
    BudgetExceeded { reason: String },
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
    #[error("task {0} was cancelled")]
    Cancelled(TaskId),
    #[error("agent step failed: {0}")]
    StepFailed(String),
}

impl AgentError {
    fn code(&self) -> &'static str {
        match self {
            AgentError::BudgetExceeded { .. } => "budget_exceeded",
            AgentError::InvalidPlan(_) => "validation",
            AgentError::Cancelled(_) => "cancelled",
            AgentError::StepFailed(_) => "internal",
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    #[error("sub-agent {agent_id} failed: {reason}")]
    SubAgentFailed { agent_id: AgentId, reason: String },
    #[error("orchestration plan is cyclic")]
    CyclicPlan,
}

#[derive(Error, Debug, Clone)]
pub enum AuditError {
    #[error("digest mismatch")]
    DigestMismatch,
    #[error("missing claim: {0}")]
    MissingClaim(String),
    #[error("signature invalid")]
    SignatureInvalid,
    #[error("artifact already sealed")]
    AlreadySealed,
}

#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error("agent already registered: {0}")]
    DuplicateRegistration(AgentId),
    #[error("agent does not meet trust floor for this session")]
    TrustFloorNotMet,
    #[error("no free concurrency slot")]
    NoCapacity,
    #[error("agent not registered: {0}")]
    NotRegistered(AgentId),
}

impl SessionError {
    fn code(&self) -> &'static str {
        match self {
            SessionError::DuplicateRegistration(_) => "validation",
            SessionError::TrustFloorNotMet => "security_violation",
            SessionError::NoCapacity => "rate_limited",
            SessionError::NotRegistered(_) => "validation",
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("missing required field: {0}")]
    MissingField(String),
}

/// Result alias used throughout the crate.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// The fields every user-facing error carries (§7).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub cause: Option<String>,
    pub correlation_id: Option<CorrelationId>,
    pub provider: Option<String>,
    pub status: Option<u16>,
}

impl ErrorEnvelope {
    pub fn from_error(err: &RuntimeError, correlation_id: Option<CorrelationId>) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            cause: None,
            correlation_id,
            provider: None,
            status: None,
        }
    }
}
