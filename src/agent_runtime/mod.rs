//! C7 — Agent Runtime: the plan/execute/reflect core that drives the
//! typestate phases in [`phases`] to completion, emitting the `agent.*`
//! lifecycle events and honoring cancellation promptly (§4.7).

pub mod phases;

use crate::audit::{AuditArtifact, AuditRecord, AuditSession, REQUIRED_CLAIM_TOTAL_TASKS};
use crate::config::{DigestAlgo, ReflectPolicy};
use crate::event_bus::EventBus;
use crate::provider::chain::FallbackChain;
use crate::provider::GenerateOptions;
use crate::tool::registry::ToolExecutionContext;
use crate::tool::ToolRegistry;
use crate::types::event::{event_type, Event};
use crate::types::task::{PlannedStep, StepKind, Task, TaskState};
use phases::{
    AgentLoop, Analyze, EvaluateOutcome, EvaluateVerdict, IterateOutcome, LoopTermination,
    StepOutcome,
};
use sha2::{Digest as Sha2Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A freshly planned step list, supplied by the caller (or a planning
/// model call under C4) before `run` takes over execution.
pub type Planner = dyn Fn(&TaskState) -> Vec<PlannedStep> + Send + Sync;

pub struct AgentRuntime {
    providers: Arc<FallbackChain>,
    tools: ToolRegistry,
    bus: EventBus,
    reflect_policy: ReflectPolicy,
    max_retries_per_step: u32,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ReflectionSummary {
    pub steps_executed: usize,
    pub steps_failed: usize,
    pub improvements: Vec<String>,
    pub next_goal: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunOutcome {
    pub final_state: TaskState,
    pub reflection: Option<ReflectionSummary>,
    /// Sealed C9 artifact over this run's step records; `None` only if
    /// sealing itself failed (never happens on the path taken here, since
    /// `core.totalTasks` is always supplied).
    pub audit: Option<AuditArtifact>,
}

impl AgentRuntime {
    pub fn new(
        providers: Arc<FallbackChain>,
        tools: ToolRegistry,
        bus: EventBus,
        reflect_policy: ReflectPolicy,
    ) -> Self {
        Self {
            providers,
            tools,
            bus,
            reflect_policy,
            max_retries_per_step: 2,
        }
    }

    pub async fn run(
        &self,
        task: &Task,
        planner: &Planner,
        cancellation: CancellationToken,
    ) -> RunOutcome {
        let _ = self.bus.publish(Event::new(
            event_type::AGENT_STARTED,
            "agent_runtime",
            Some(task.correlation_id),
            serde_json::json!({ "taskId": task.id.to_string() }),
        ));

        let state = TaskState::new(task.id, task.budget.max_steps);
        let analyzing = AgentLoop::<Analyze>::new(state);
        let mut planning = analyzing.analyze();
        let mut retries: HashMap<usize, u32> = HashMap::new();

        let mut executing = loop {
            let steps = planner(&planning.state);
            match planning.plan(steps) {
                Ok(executing) => break executing,
                Err(term) => {
                    return self
                        .finish(task, terminal_state_for(term, task.id), true)
                        .await
                }
            }
        };

        let final_state = loop {
            if cancellation.is_cancelled() {
                let term = executing.cancel();
                break terminal_state_for(term, task.id);
            }

            let Some(step) = executing.next_step().cloned() else {
                // Nothing planned; treat as immediately done.
                break executing.state;
            };

            let outcome = self.run_step(task, &step, &cancellation).await;
            let retryable = matches!(&outcome, StepOutcome::Err { retryable: true, .. });
            let failed = matches!(&outcome, StepOutcome::Err { .. });
            let current_index = executing.state.current_step;

            let evaluating = executing.record_outcome(outcome);

            let verdict = if !failed {
                EvaluateVerdict::Continue
            } else {
                let attempts = retries.entry(current_index).or_insert(0);
                if retryable && *attempts < self.max_retries_per_step {
                    *attempts += 1;
                    EvaluateVerdict::Retry {
                        revised_input: step.input.clone(),
                    }
                } else if retryable {
                    EvaluateVerdict::Replan
                } else {
                    EvaluateVerdict::Retry {
                        revised_input: step.input.clone(),
                    }
                }
            };

            match evaluating.evaluate(verdict, retryable) {
                EvaluateOutcome::Advance(iterating) => {
                    match iterating.iterate(task.budget.wall_ms) {
                        IterateOutcome::Next(next) => executing = next,
                        IterateOutcome::Done(state) => break state,
                        IterateOutcome::Failed(term) => break terminal_state_for(term, task.id),
                    }
                }
                EvaluateOutcome::RetrySameStep(next) => executing = next,
                EvaluateOutcome::Replan(planning_again) => {
                    let steps = planner(&planning_again.state);
                    match planning_again.plan(steps) {
                        Ok(next) => executing = next,
                        Err(term) => break terminal_state_for(term, task.id),
                    }
                }
                EvaluateOutcome::Failed(term) => break terminal_state_for(term, task.id),
            }
        };

        let succeeded = final_state.phase == crate::types::task::Phase::Done;
        self.finish(task, final_state, !succeeded).await
    }

    async fn run_step(
        &self,
        task: &Task,
        step: &PlannedStep,
        cancellation: &CancellationToken,
    ) -> StepOutcome {
        let ctx = ToolExecutionContext {
            cancellation: cancellation.clone(),
            deadline: std::time::Instant::now() + task.budget.wall_ms,
            correlation_id: Some(task.correlation_id),
        };

        match step.kind {
            StepKind::Model => {
                let prompt = step.input.to_string();
                match self.providers.generate(&prompt, GenerateOptions::default()).await {
                    Ok(result) => StepOutcome::ModelOk(result),
                    Err(e) => StepOutcome::Err {
                        message: e.to_string(),
                        retryable: e.is_retryable(),
                    },
                }
            }
            StepKind::Tool => {
                match self
                    .tools
                    .execute(&step.target, step.input.clone(), &ctx)
                    .await
                {
                    Ok(value) => StepOutcome::ToolOk(value),
                    Err(e) => StepOutcome::Err {
                        message: e.to_string(),
                        retryable: matches!(e, crate::types::error::ToolError::ExecutionFailed(_)),
                    },
                }
            }
            StepKind::Reflect => StepOutcome::ToolOk(serde_json::json!({})),
        }
    }

    async fn finish(&self, task: &Task, state: TaskState, failed: bool) -> RunOutcome {
        let reflection = match self.reflect_policy {
            ReflectPolicy::SkipOnCancel if state.phase == crate::types::task::Phase::Cancelled => None,
            _ => Some(self.reflect(&state)),
        };

        if failed && state.phase != crate::types::task::Phase::Done {
            let _ = self.bus.publish(Event::new(
                event_type::AGENT_FAILED,
                "agent_runtime",
                Some(task.correlation_id),
                serde_json::json!({
                    "errorCode": state.error.clone().unwrap_or_default(),
                    "phase": format!("{:?}", state.phase),
                }),
            ));
        } else {
            let _ = self.bus.publish(Event::new(
                event_type::AGENT_COMPLETED,
                "agent_runtime",
                Some(task.correlation_id),
                serde_json::json!({
                    "resultPayload": state.result_payload,
                    "metrics": { "iterations": state.iterations, "steps": state.step_records.len() },
                }),
            ));
        }

        let audit = self.seal_audit(task, &state, failed);

        RunOutcome {
            final_state: state,
            reflection,
            audit,
        }
    }

    /// Seals a C9 artifact over this run's ordered step records. The seed
    /// identifies the task; the execution hash fingerprints the exact
    /// ordered record set so two artifacts from re-executions with
    /// differing step outcomes are distinguishable even before comparing
    /// digests.
    fn seal_audit(&self, task: &Task, state: &TaskState, failed: bool) -> Option<AuditArtifact> {
        let records: Vec<AuditRecord> = state
            .step_records
            .iter()
            .map(|r| AuditRecord {
                id: r.id.to_string(),
                success: r.success,
                value: r.output.clone().unwrap_or(serde_json::Value::Null),
                error: r.error.clone(),
            })
            .collect();

        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_string(&records).unwrap_or_default().as_bytes());
        let execution_hash = hex::encode(hasher.finalize());

        let mut session = AuditSession::open(task.id.to_string(), execution_hash, records);
        session.add_claim(REQUIRED_CLAIM_TOTAL_TASKS, serde_json::json!(state.step_records.len()));
        session.add_claim("core.allSucceeded", serde_json::json!(!failed));

        session.finalize(DigestAlgo::Sha256, None).ok()
    }

    /// Advisory only: never mutates terminal state (§4.7 Reflect).
    fn reflect(&self, state: &TaskState) -> ReflectionSummary {
        let failed_steps = state.step_records.iter().filter(|r| !r.success).count();
        let mut improvements = Vec::new();
        if failed_steps > 0 {
            improvements.push("review failed step inputs for missing context".to_string());
        }
        if state.iterations as f64 > state.max_iterations as f64 * 0.8 {
            improvements.push("plan consumed most of its iteration budget".to_string());
        }
        ReflectionSummary {
            steps_executed: state.step_records.len(),
            steps_failed: failed_steps,
            next_goal: if failed_steps > 0 {
                Some("retry the failed steps with revised inputs".to_string())
            } else {
                None
            },
            improvements,
        }
    }
}

fn terminal_state_for(term: LoopTermination, task_id: crate::types::ids::TaskId) -> TaskState {
    // Constructing a TaskState purely for its terminal phase/error; the
    // caller threads `executing.state`/`evaluating.state` through instead
    // whenever one is already in hand — this path only triggers before any
    // state exists yet (a plan rejected before the first step ran).
    let mut state = TaskState::new(task_id, 0);
    match term {
        LoopTermination::BudgetExceeded { iterations } => {
            state.phase = crate::types::task::Phase::Failed;
            state.iterations = iterations;
            state.error = Some("budget_exceeded".to_string());
        }
        LoopTermination::Cancelled => {
            state.phase = crate::types::task::Phase::Cancelled;
        }
        LoopTermination::Failed { reason } => {
            state.phase = crate::types::task::Phase::Failed;
            state.error = Some(reason);
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
    use crate::config::{BusConfig, ProviderChainConfig};
    use crate::provider::local::LocalProvider;
    use crate::store::RateLimiter;
    use crate::types::ids::StepId;
    use std::time::Duration;

    fn unlimited_rate_limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(Duration::from_secs(60), u32::MAX))
    }

    fn runtime() -> AgentRuntime {
        let bus = EventBus::new(&BusConfig::default());
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default(),
            bus.clone(),
        ));
        let chain = Arc::new(FallbackChain::new(
            vec![Arc::new(LocalProvider::echo("local"))],
            breakers,
            bus.clone(),
            ProviderChainConfig::default(),
            unlimited_rate_limiter(),
        ));
        AgentRuntime::new(chain, ToolRegistry::new(), bus, ReflectPolicy::Always)
    }

    fn task() -> Task {
        Task::new("test", serde_json::json!({}), vec![])
    }

    #[tokio::test]
    async fn empty_plan_completes_immediately() {
        let runtime = runtime();
        let outcome = runtime
            .run(&task(), &|_state| Vec::new(), CancellationToken::new())
            .await;
        assert!(outcome.reflection.is_some());
    }

    #[tokio::test]
    async fn single_model_step_runs_to_done() {
        let runtime = runtime();
        let step_id = StepId::new();
        let outcome = runtime
            .run(
                &task(),
                &move |_state| {
                    vec![PlannedStep {
                        id: step_id,
                        kind: StepKind::Model,
                        target: "local".into(),
                        input: serde_json::json!("hello"),
                        dependencies: vec![],
                    }]
                },
                CancellationToken::new(),
            )
            .await;
        assert_eq!(
            outcome.final_state.phase,
            crate::types::task::Phase::Done
        );
        assert_eq!(outcome.final_state.step_records.len(), 1);
        let audit = outcome.audit.expect("audit artifact sealed on completion");
        assert_eq!(audit.records.len(), 1);
        assert_eq!(
            audit.claims[crate::audit::REQUIRED_CLAIM_TOTAL_TASKS],
            serde_json::json!(1)
        );
    }

    #[tokio::test]
    async fn cancellation_never_reaches_done() {
        let runtime = runtime();
        let token = CancellationToken::new();
        token.cancel();
        let step_id = StepId::new();
        let outcome = runtime
            .run(
                &task(),
                &move |_state| {
                    vec![PlannedStep {
                        id: step_id,
                        kind: StepKind::Model,
                        target: "local".into(),
                        input: serde_json::json!("hello"),
                        dependencies: vec![],
                    }]
                },
                token,
            )
            .await;
        assert_ne!(outcome.final_state.phase, crate::types::task::Phase::Done);
    }

    #[tokio::test]
    async fn skip_on_cancel_suppresses_reflection() {
        let bus = EventBus::new(&BusConfig::default());
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default(),
            bus.clone(),
        ));
        let chain = Arc::new(FallbackChain::new(
            vec![Arc::new(LocalProvider::echo("local"))],
            breakers,
            bus.clone(),
            ProviderChainConfig::default(),
            unlimited_rate_limiter(),
        ));
        let runtime = AgentRuntime::new(chain, ToolRegistry::new(), bus, ReflectPolicy::SkipOnCancel);
        let token = CancellationToken::new();
        token.cancel();
        let step_id = StepId::new();
        let outcome = runtime
            .run(
                &task(),
                &move |_state| {
                    vec![PlannedStep {
                        id: step_id,
                        kind: StepKind::Model,
                        target: "local".into(),
                        input: serde_json::json!("hello"),
                        dependencies: vec![],
                    }]
                },
                token,
            )
            .await;
        assert!(outcome.reflection.is_none());
    }
}
