//! Typestate encoding of the C7 agent-loop state machine. The phases are
//! not a fixed ring: `evaluate` can step back to `execute` (retry) or to
//! `plan` (replan) before ever reaching `iterate`, so each phase's
//! transition method returns an outcome enum over the possible next
//! typestates rather than a single fixed `AgentLoop<NextPhase>`.

use crate::provider::ProviderResult;
use crate::tool::ToolMappingResult;
use crate::types::ids::StepId;
use crate::types::task::{PlannedStep, StepKind, StepRecord, TaskState};
use std::marker::PhantomData;
use std::time::Instant;

/// Marker trait for phase zero-sized types; never implemented outside this module.
pub trait AgentPhase: private::Sealed {}

mod private {
    pub trait Sealed {}
}

macro_rules! phase_marker {
    ($name:ident) => {
        #[derive(Debug)]
        pub struct $name;
        impl private::Sealed for $name {}
        impl AgentPhase for $name {}
    };
}

phase_marker!(Analyze);
phase_marker!(Plan);
phase_marker!(Execute);
phase_marker!(Evaluate);
phase_marker!(Iterate);

/// Reason a loop terminated outside the documented phase edges.
#[derive(Debug, Clone)]
pub enum LoopTermination {
    BudgetExceeded { iterations: u32 },
    Cancelled,
    Failed { reason: String },
}

/// The generic typestate carrier. `state` is the only thing that survives
/// a phase transition; `PhantomData` makes the current phase a compile-time
/// fact rather than a runtime-checked one.
pub struct AgentLoop<Phase: AgentPhase> {
    pub state: TaskState,
    started_at: Instant,
    _phase: PhantomData<Phase>,
}

impl AgentLoop<Analyze> {
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            started_at: Instant::now(),
            _phase: PhantomData,
        }
    }

    /// Derives required capabilities/context (left to the caller, who owns
    /// the task definition) and advances unconditionally to `plan`.
    pub fn analyze(mut self) -> AgentLoop<Plan> {
        self.state.phase = crate::types::task::Phase::Plan;
        AgentLoop {
            state: self.state,
            started_at: self.started_at,
            _phase: PhantomData,
        }
    }
}

impl AgentLoop<Plan> {
    /// A plan is valid iff `steps`' dependencies form a DAG over step ids
    /// already present in `steps` itself.
    pub fn plan(mut self, steps: Vec<PlannedStep>) -> Result<AgentLoop<Execute>, LoopTermination> {
        if !is_dag(&steps) {
            return Err(LoopTermination::Failed {
                reason: "plan dependencies are cyclic".to_string(),
            });
        }
        self.state.planned_steps = steps;
        self.state.current_step = 0;
        self.state.phase = crate::types::task::Phase::Execute;
        Ok(AgentLoop {
            state: self.state,
            started_at: self.started_at,
            _phase: PhantomData,
        })
    }
}

fn is_dag(steps: &[PlannedStep]) -> bool {
    let ids: std::collections::HashSet<StepId> = steps.iter().map(|s| s.id).collect();
    for step in steps {
        for dep in &step.dependencies {
            if !ids.contains(dep) {
                return false;
            }
        }
    }
    // Simple cycle check via Kahn's algorithm.
    let mut indegree: std::collections::HashMap<StepId, usize> =
        ids.iter().map(|id| (*id, 0)).collect();
    for step in steps {
        for _dep in &step.dependencies {
            *indegree.get_mut(&step.id).unwrap() += 1;
        }
    }
    let mut queue: std::collections::VecDeque<StepId> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0;
    while let Some(id) = queue.pop_front() {
        visited += 1;
        for step in steps {
            if step.dependencies.contains(&id) {
                let entry = indegree.get_mut(&step.id).unwrap();
                *entry -= 1;
                if *entry == 0 {
                    queue.push_back(step.id);
                }
            }
        }
    }
    visited == steps.len()
}

/// What actually happened when a step ran; fed into `evaluate`.
pub enum StepOutcome {
    ModelOk(ProviderResult),
    ToolOk(serde_json::Value),
    MapperOk(ToolMappingResult),
    Err { message: String, retryable: bool },
}

impl AgentLoop<Execute> {
    /// The step about to run, or `None` if the plan is exhausted.
    pub fn next_step(&self) -> Option<&PlannedStep> {
        self.state.planned_steps.get(self.state.current_step)
    }

    /// Record the outcome of running `next_step()` and advance to `evaluate`.
    /// Cancellation is checked by the caller before invoking this; a
    /// cancelled task never reaches `done` because `iterate` observes
    /// `state.phase == Cancelled` and halts there instead of continuing.
    pub fn record_outcome(mut self, outcome: StepOutcome) -> AgentLoop<Evaluate> {
        if let Some(step) = self.state.planned_steps.get(self.state.current_step).cloned() {
            let started = chrono::Utc::now();
            let (output, error, success) = match &outcome {
                StepOutcome::ModelOk(r) => (Some(serde_json::json!({ "text": r.text })), None, true),
                StepOutcome::ToolOk(v) => (Some(v.clone()), None, true),
                StepOutcome::MapperOk(m) => (Some(serde_json::to_value(m).unwrap()), None, true),
                StepOutcome::Err { message, .. } => (None, Some(message.clone()), false),
            };
            self.state.push_record(StepRecord {
                id: step.id,
                kind: step.kind,
                input: step.input,
                output,
                error,
                success,
                latency_ms: 0,
                started_at: started,
                ended_at: chrono::Utc::now(),
            });
        }
        self.state.phase = crate::types::task::Phase::Evaluate;
        AgentLoop {
            state: self.state,
            started_at: self.started_at,
            _phase: PhantomData,
        }
    }

    pub fn cancel(mut self) -> LoopTermination {
        self.state.phase = crate::types::task::Phase::Cancelled;
        LoopTermination::Cancelled
    }
}

/// Per-step retry bookkeeping; the caller tracks this externally (e.g. in a
/// small `HashMap<StepId, u32>`) and passes the current count in.
pub enum EvaluateVerdict {
    Continue,
    Retry { revised_input: serde_json::Value },
    Replan,
}

/// What `evaluate` hands back: one of the three documented edges.
pub enum EvaluateOutcome {
    /// `evaluate -> iterate`, the common case.
    Advance(AgentLoop<Iterate>),
    /// `evaluate -> execute` (retry), bounded by the caller's retry cap.
    RetrySameStep(AgentLoop<Execute>),
    /// `evaluate -> plan` (replan), discarding the tail of the plan.
    Replan(AgentLoop<Plan>),
    /// A non-retryable step error jumps straight to `failed`.
    Failed(LoopTermination),
}

impl AgentLoop<Evaluate> {
    pub fn evaluate(mut self, verdict: EvaluateVerdict, retryable: bool) -> EvaluateOutcome {
        match verdict {
            EvaluateVerdict::Continue => {
                self.state.current_step += 1;
                self.state.phase = crate::types::task::Phase::Iterate;
                EvaluateOutcome::Advance(AgentLoop {
                    state: self.state,
                    started_at: self.started_at,
                    _phase: PhantomData,
                })
            }
            EvaluateVerdict::Retry { revised_input } => {
                if !retryable {
                    return EvaluateOutcome::Failed(LoopTermination::Failed {
                        reason: "non-retryable step error".to_string(),
                    });
                }
                if let Some(step) = self.state.planned_steps.get_mut(self.state.current_step) {
                    step.input = revised_input;
                }
                self.state.phase = crate::types::task::Phase::Execute;
                EvaluateOutcome::RetrySameStep(AgentLoop {
                    state: self.state,
                    started_at: self.started_at,
                    _phase: PhantomData,
                })
            }
            EvaluateVerdict::Replan => {
                self.state
                    .planned_steps
                    .truncate(self.state.current_step);
                self.state.phase = crate::types::task::Phase::Plan;
                EvaluateOutcome::Replan(AgentLoop {
                    state: self.state,
                    started_at: self.started_at,
                    _phase: PhantomData,
                })
            }
        }
    }
}

pub enum IterateOutcome {
    /// Steps remain: `iterate -> execute`.
    Next(AgentLoop<Execute>),
    /// Plan exhausted: `iterate -> done`.
    Done(TaskState),
    /// `iterations > maxIterations` or wall-time exceeded: `iterate -> failed`.
    Failed(LoopTermination),
}

impl AgentLoop<Iterate> {
    pub fn iterate(mut self, wall_budget: std::time::Duration) -> IterateOutcome {
        self.state.iterations += 1;

        if self.state.phase == crate::types::task::Phase::Cancelled {
            return IterateOutcome::Failed(LoopTermination::Cancelled);
        }
        if self.state.iterations > self.state.max_iterations
            || self.started_at.elapsed() > wall_budget
        {
            self.state.phase = crate::types::task::Phase::Failed;
            self.state.error = Some("budget_exceeded".to_string());
            return IterateOutcome::Failed(LoopTermination::BudgetExceeded {
                iterations: self.state.iterations,
            });
        }

        if self.state.current_step >= self.state.planned_steps.len() {
            self.state.phase = crate::types::task::Phase::Done;
            IterateOutcome::Done(self.state)
        } else {
            self.state.phase = crate::types::task::Phase::Execute;
            IterateOutcome::Next(AgentLoop {
                state: self.state,
                started_at: self.started_at,
                _phase: PhantomData,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ids::{StepId, TaskId};

    fn fresh_state() -> TaskState {
        TaskState::new(TaskId::new(), 10)
    }

    fn step(id: StepId, deps: Vec<StepId>) -> PlannedStep {
        PlannedStep {
            id,
            kind: StepKind::Tool,
            target: "noop".into(),
            input: serde_json::json!({}),
            dependencies: deps,
        }
    }

    // These exist to prove, by virtue of compiling, that the typestate
    // prevents skipping a phase — e.g. calling `.plan()` is only possible
    // on `AgentLoop<Plan>`, which only `analyze()` can produce.
    fn _prove_analyze_to_plan(l: AgentLoop<Analyze>) -> AgentLoop<Plan> {
        l.analyze()
    }

    fn _prove_plan_to_execute(l: AgentLoop<Plan>) -> Result<AgentLoop<Execute>, LoopTermination> {
        l.plan(vec![])
    }

    #[test]
    fn analyze_advances_to_plan() {
        let loop_ = AgentLoop::<Analyze>::new(fresh_state());
        let planning = loop_.analyze();
        assert_eq!(planning.state.phase, crate::types::task::Phase::Plan);
    }

    #[test]
    fn cyclic_plan_rejected() {
        let a = StepId::new();
        let b = StepId::new();
        let loop_ = AgentLoop::<Analyze>::new(fresh_state()).analyze();
        let result = loop_.plan(vec![step(a, vec![b]), step(b, vec![a])]);
        assert!(matches!(result, Err(LoopTermination::Failed { .. })));
    }

    #[test]
    fn valid_plan_advances_to_execute() {
        let a = StepId::new();
        let loop_ = AgentLoop::<Analyze>::new(fresh_state()).analyze();
        let executing = loop_.plan(vec![step(a, vec![])]).unwrap();
        assert_eq!(executing.state.phase, crate::types::task::Phase::Execute);
        assert_eq!(executing.next_step().unwrap().id, a);
    }

    #[test]
    fn evaluate_retry_returns_to_execute() {
        let a = StepId::new();
        let executing = AgentLoop::<Analyze>::new(fresh_state())
            .analyze()
            .plan(vec![step(a, vec![])])
            .unwrap();
        let evaluating = executing.record_outcome(StepOutcome::Err {
            message: "timeout".into(),
            retryable: true,
        });
        match evaluating.evaluate(
            EvaluateVerdict::Retry {
                revised_input: serde_json::json!({"retry": true}),
            },
            true,
        ) {
            EvaluateOutcome::RetrySameStep(l) => {
                assert_eq!(l.state.phase, crate::types::task::Phase::Execute)
            }
            _ => panic!("expected retry"),
        }
    }

    #[test]
    fn evaluate_non_retryable_fails() {
        let a = StepId::new();
        let executing = AgentLoop::<Analyze>::new(fresh_state())
            .analyze()
            .plan(vec![step(a, vec![])])
            .unwrap();
        let evaluating = executing.record_outcome(StepOutcome::Err {
            message: "bad request".into(),
            retryable: false,
        });
        let outcome = evaluating.evaluate(
            EvaluateVerdict::Retry {
                revised_input: serde_json::json!({}),
            },
            false,
        );
        assert!(matches!(outcome, EvaluateOutcome::Failed(_)));
    }

    #[test]
    fn evaluate_replan_truncates_remaining_steps() {
        let a = StepId::new();
        let b = StepId::new();
        let executing = AgentLoop::<Analyze>::new(fresh_state())
            .analyze()
            .plan(vec![step(a, vec![]), step(b, vec![])])
            .unwrap();
        let evaluating = executing.record_outcome(StepOutcome::ToolOk(serde_json::json!({})));
        match evaluating.evaluate(EvaluateVerdict::Replan, true) {
            EvaluateOutcome::Replan(l) => {
                assert_eq!(l.state.phase, crate::types::task::Phase::Plan);
                assert_eq!(l.state.planned_steps.len(), 1);
            }
            _ => panic!("expected replan"),
        }
    }

    #[test]
    fn iterate_completes_when_steps_exhausted() {
        let a = StepId::new();
        let executing = AgentLoop::<Analyze>::new(fresh_state())
            .analyze()
            .plan(vec![step(a, vec![])])
            .unwrap();
        let evaluating = executing.record_outcome(StepOutcome::ToolOk(serde_json::json!({})));
        let iterating = match evaluating.evaluate(EvaluateVerdict::Continue, true) {
            EvaluateOutcome::Advance(l) => l,
            _ => panic!("expected advance"),
        };
        match iterating.iterate(std::time::Duration::from_secs(60)) {
            IterateOutcome::Done(state) => assert_eq!(state.phase, crate::types::task::Phase::Done),
            _ => panic!("expected done"),
        }
    }

    #[test]
    fn iterate_fails_past_max_iterations() {
        let mut state = fresh_state();
        state.max_iterations = 0;
        state.iterations = 0;
        state.current_step = 0;
        state.planned_steps = vec![step(StepId::new(), vec![])];
        let loop_ = AgentLoop::<Iterate> {
            state,
            started_at: Instant::now(),
            _phase: PhantomData,
        };
        let outcome = loop_.iterate(std::time::Duration::from_secs(60));
        assert!(matches!(
            outcome,
            IterateOutcome::Failed(LoopTermination::BudgetExceeded { .. })
        ));
    }
}
