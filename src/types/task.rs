//! Task, AgentSpec, TaskState and StepRecord — the data model of §3.

use super::{AgentId, Capability, CorrelationId, IsolationLevel, Priority, StepId, TaskId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A task's resource budget. Enforced by the agent runtime's `iterate` phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Budget {
    #[serde(with = "humantime_serde")]
    pub wall_ms: Duration,
    pub max_steps: u32,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            wall_ms: Duration::from_secs(120),
            max_steps: 50,
        }
    }
}

/// Immutable after submission. Created by the caller; destroyed when the
/// runtime finalizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: String,
    pub input: serde_json::Value,
    pub budget: Budget,
    pub required_capabilities: Vec<Capability>,
    pub priority: Priority,
    pub correlation_id: CorrelationId,
}

impl Task {
    pub fn new(
        kind: impl Into<String>,
        input: serde_json::Value,
        required_capabilities: Vec<Capability>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            kind: kind.into(),
            input,
            budget: Budget::default(),
            required_capabilities,
            priority: Priority::default(),
            correlation_id: CorrelationId::new(),
        }
    }
}

/// Loaded at startup; immutable at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: AgentId,
    pub name: String,
    pub capabilities: Vec<Capability>,
    /// 0..=10
    pub trust_level: u8,
    pub model_targets: Vec<String>,
    pub tools: Vec<String>,
    pub specialization: String,
    pub isolation: IsolationLevel,
}

impl AgentSpec {
    pub fn has_capabilities(&self, required: &[Capability]) -> bool {
        required.iter().all(|r| self.capabilities.contains(r))
    }
}

/// Phase of the plan/execute/reflect state machine (C7, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Analyze,
    Plan,
    Execute,
    Evaluate,
    Iterate,
    Done,
    Failed,
    Cancelled,
}

/// Kind of a planned or executed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    Model,
    Tool,
    Reflect,
}

/// A single entry of an agent's plan (C7 `Plan`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedStep {
    pub id: StepId,
    pub kind: StepKind,
    pub target: String,
    pub input: serde_json::Value,
    pub dependencies: Vec<StepId>,
}

/// Appended by C7 only, append-only (§3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: StepId,
    pub kind: StepKind,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub success: bool,
    pub latency_ms: u64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: chrono::DateTime<chrono::Utc>,
}

/// Per-task mutable state, owned exclusively by the runtime instance
/// processing the task (§3 Ownership).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: TaskId,
    pub phase: Phase,
    pub current_step: usize,
    pub planned_steps: Vec<PlannedStep>,
    pub step_records: Vec<StepRecord>,
    pub iterations: u32,
    pub max_iterations: u32,
    pub error: Option<String>,
    pub result_payload: Option<serde_json::Value>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl TaskState {
    pub fn new(task_id: TaskId, max_iterations: u32) -> Self {
        Self {
            task_id,
            phase: Phase::Analyze,
            current_step: 0,
            planned_steps: Vec::new(),
            step_records: Vec::new(),
            iterations: 0,
            max_iterations,
            error: None,
            result_payload: None,
            started_at: chrono::Utc::now(),
        }
    }

    pub fn push_record(&mut self, record: StepRecord) {
        self.step_records.push(record);
    }

    pub fn elapsed(&self) -> chrono::Duration {
        chrono::Utc::now() - self.started_at
    }
}
