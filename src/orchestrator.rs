//! C8 — Orchestrator / Master Agent Graph.
//!
//! A directed graph of sub-agent nodes, each delegated through C6/C7, merged
//! into one composite artifact, with per-strategy failure handling
//! (sequential abort, parallel partial-failure, hierarchical compensation,
//! adaptive single retry).

use crate::agent_runtime::{AgentRuntime, Planner, RunOutcome};
use crate::audit::AuditArtifact;
use crate::dispatcher::{Dispatcher, LoadObserver};
use crate::types::error::OrchestratorError;
use crate::types::ids::AgentId;
use crate::types::task::{AgentSpec, Task};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    Sequential,
    Parallel,
    Hierarchical,
    Adaptive,
}

/// A node in the sub-agent graph; `depends_on` references other nodes by
/// index into the orchestrator's node list.
pub struct PlanNode {
    pub task: Task,
    pub depends_on: Vec<usize>,
    pub compensator: Option<Arc<Planner>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeResult {
    pub task_id: crate::types::ids::TaskId,
    pub succeeded: bool,
    pub result_payload: Option<serde_json::Value>,
    pub error: Option<String>,
    pub audit: Option<AuditArtifact>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompositeResult {
    pub strategy: Strategy,
    pub node_results: Vec<NodeResult>,
    pub partial_failure: bool,
}

pub struct Orchestrator {
    runtime: Arc<AgentRuntime>,
    dispatcher: Arc<Dispatcher>,
}

impl Orchestrator {
    pub fn new(runtime: Arc<AgentRuntime>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            runtime,
            dispatcher,
        }
    }

    /// Execute `nodes` under `strategy`, delegating each to C6 (for agent
    /// selection) then C7 (for plan/execute/reflect), and merging results.
    /// Strategy is the caller's choice, not inferred from the node graph.
    pub async fn execute(
        &self,
        strategy: Strategy,
        nodes: Vec<PlanNode>,
        agents: &[AgentSpec],
        trust_floor: u8,
        load: &dyn LoadObserver,
        planner: &Planner,
        cancellation: CancellationToken,
    ) -> Result<CompositeResult, OrchestratorError> {
        if has_cycle(&nodes) {
            return Err(OrchestratorError::CyclicPlan);
        }

        match strategy {
            Strategy::Sequential => {
                self.run_sequential(nodes, agents, trust_floor, load, planner, cancellation)
                    .await
            }
            Strategy::Parallel => {
                self.run_parallel(nodes, agents, trust_floor, load, planner, cancellation)
                    .await
            }
            Strategy::Hierarchical => {
                self.run_hierarchical(nodes, agents, trust_floor, load, planner, cancellation)
                    .await
            }
            Strategy::Adaptive => {
                self.run_adaptive(nodes, agents, trust_floor, load, planner, cancellation)
                    .await
            }
        }
    }

    async fn delegate(
        &self,
        node: &PlanNode,
        agents: &[AgentSpec],
        trust_floor: u8,
        load: &dyn LoadObserver,
        planner: &Planner,
        cancellation: CancellationToken,
    ) -> NodeResult {
        let dispatch = self
            .dispatcher
            .dispatch(&node.task, agents, trust_floor, load);
        if let Err(e) = dispatch {
            return NodeResult {
                task_id: node.task.id,
                succeeded: false,
                result_payload: None,
                error: Some(e.to_string()),
                audit: None,
            };
        }

        let RunOutcome {
            final_state, audit, ..
        } = self.runtime.run(&node.task, planner, cancellation).await;

        NodeResult {
            task_id: node.task.id,
            succeeded: final_state.phase == crate::types::task::Phase::Done,
            result_payload: final_state.result_payload,
            error: final_state.error,
            audit,
        }
    }

    /// `sequential` aborts on the first failure.
    pub async fn run_sequential(
        &self,
        nodes: Vec<PlanNode>,
        agents: &[AgentSpec],
        trust_floor: u8,
        load: &dyn LoadObserver,
        planner: &Planner,
        cancellation: CancellationToken,
    ) -> Result<CompositeResult, OrchestratorError> {
        let mut results = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let result = self
                .delegate(node, agents, trust_floor, load, planner, cancellation.clone())
                .await;
            let failed = !result.succeeded;
            results.push(result);
            if failed {
                return Ok(CompositeResult {
                    strategy: Strategy::Sequential,
                    node_results: results,
                    partial_failure: true,
                });
            }
        }
        Ok(CompositeResult {
            strategy: Strategy::Sequential,
            node_results: results,
            partial_failure: false,
        })
    }

    /// `parallel` runs every node concurrently and collects all results,
    /// reporting partial failure rather than aborting.
    pub async fn run_parallel(
        &self,
        nodes: Vec<PlanNode>,
        agents: &[AgentSpec],
        trust_floor: u8,
        load: &dyn LoadObserver,
        planner: &Planner,
        cancellation: CancellationToken,
    ) -> Result<CompositeResult, OrchestratorError> {
        let futures = nodes.iter().map(|node| {
            self.delegate(node, agents, trust_floor, load, planner, cancellation.clone())
        });
        let results: Vec<NodeResult> = futures::future::join_all(futures).await;
        let partial_failure = results.iter().any(|r| !r.succeeded);
        Ok(CompositeResult {
            strategy: Strategy::Parallel,
            node_results: results,
            partial_failure,
        })
    }

    /// `hierarchical` escalates a failed node to its parent's compensator
    /// (the first node that lists it in `depends_on`'s own compensator, if
    /// present), then continues.
    pub async fn run_hierarchical(
        &self,
        nodes: Vec<PlanNode>,
        agents: &[AgentSpec],
        trust_floor: u8,
        load: &dyn LoadObserver,
        planner: &Planner,
        cancellation: CancellationToken,
    ) -> Result<CompositeResult, OrchestratorError> {
        let mut results = Vec::with_capacity(nodes.len());
        for (idx, node) in nodes.iter().enumerate() {
            let result = self
                .delegate(node, agents, trust_floor, load, planner, cancellation.clone())
                .await;
            if !result.succeeded {
                if let Some(parent) = nodes
                    .iter()
                    .find(|n| n.depends_on.contains(&idx))
                {
                    if let Some(compensator) = &parent.compensator {
                        let _ = compensator(&crate::types::task::TaskState::new(
                            node.task.id,
                            0,
                        ));
                    }
                }
            }
            results.push(result);
        }
        let partial_failure = results.iter().any(|r| !r.succeeded);
        Ok(CompositeResult {
            strategy: Strategy::Hierarchical,
            node_results: results,
            partial_failure,
        })
    }

    /// `adaptive` may replan once: on first failure, it retries that node's
    /// task exactly one additional time before moving on.
    pub async fn run_adaptive(
        &self,
        nodes: Vec<PlanNode>,
        agents: &[AgentSpec],
        trust_floor: u8,
        load: &dyn LoadObserver,
        planner: &Planner,
        cancellation: CancellationToken,
    ) -> Result<CompositeResult, OrchestratorError> {
        let mut results = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let mut result = self
                .delegate(node, agents, trust_floor, load, planner, cancellation.clone())
                .await;
            if !result.succeeded {
                result = self
                    .delegate(node, agents, trust_floor, load, planner, cancellation.clone())
                    .await;
            }
            results.push(result);
        }
        let partial_failure = results.iter().any(|r| !r.succeeded);
        Ok(CompositeResult {
            strategy: Strategy::Adaptive,
            node_results: results,
            partial_failure,
        })
    }
}

fn has_cycle(nodes: &[PlanNode]) -> bool {
    let indegree: Vec<usize> = nodes.iter().map(|n| n.depends_on.len()).collect();
    let mut queue: std::collections::VecDeque<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| i)
        .collect();
    let mut visited = 0;
    let mut remaining = indegree;
    while let Some(i) = queue.pop_front() {
        visited += 1;
        for (j, node) in nodes.iter().enumerate() {
            if node.depends_on.contains(&i) {
                remaining[j] -= 1;
                if remaining[j] == 0 {
                    queue.push_back(j);
                }
            }
        }
    }
    visited != nodes.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
    use crate::config::{BusConfig, ProviderChainConfig, ReflectPolicy};
    use crate::event_bus::EventBus;
    use crate::provider::chain::FallbackChain;
    use crate::provider::local::LocalProvider;
    use crate::store::RateLimiter;
    use crate::tool::ToolRegistry;
    use std::collections::HashMap as Map;
    use std::time::Duration;

    fn unlimited_rate_limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(Duration::from_secs(60), u32::MAX))
    }

    fn orchestrator() -> Orchestrator {
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
        let runtime = Arc::new(AgentRuntime::new(
            chain,
            ToolRegistry::new(),
            bus,
            ReflectPolicy::Always,
        ));
        Orchestrator::new(runtime, Arc::new(Dispatcher::new()))
    }

    fn agent() -> AgentSpec {
        AgentSpec {
            id: AgentId::new(),
            name: "a".into(),
            capabilities: vec![],
            trust_level: 5,
            model_targets: vec![],
            tools: vec![],
            specialization: "general".into(),
            isolation: crate::types::IsolationLevel::Moderate,
        }
    }

    fn node() -> PlanNode {
        PlanNode {
            task: Task::new("test", serde_json::json!({}), vec![]),
            depends_on: vec![],
            compensator: None,
        }
    }

    #[tokio::test]
    async fn sequential_runs_all_nodes_on_success() {
        let orchestrator = orchestrator();
        let agents = vec![agent()];
        let result = orchestrator
            .run_sequential(
                vec![node(), node()],
                &agents,
                0,
                &crate::dispatcher::StaticLoad(Map::new()),
                &|_state| Vec::new(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.node_results.len(), 2);
        assert!(!result.partial_failure);
        assert!(result.node_results.iter().all(|r| r.audit.is_some()));
    }

    #[tokio::test]
    async fn execute_dispatches_to_chosen_strategy() {
        let orchestrator = orchestrator();
        let agents = vec![agent()];
        let result = orchestrator
            .execute(
                Strategy::Parallel,
                vec![node(), node()],
                &agents,
                0,
                &crate::dispatcher::StaticLoad(Map::new()),
                &|_state| Vec::new(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.strategy, Strategy::Parallel);
        assert_eq!(result.node_results.len(), 2);
    }

    #[tokio::test]
    async fn cyclic_plan_rejected() {
        let orchestrator = orchestrator();
        let agents = vec![agent()];
        let mut a = node();
        let mut b = node();
        a.depends_on = vec![1];
        b.depends_on = vec![0];
        let result = orchestrator
            .execute(
                Strategy::Sequential,
                vec![a, b],
                &agents,
                0,
                &crate::dispatcher::StaticLoad(Map::new()),
                &|_state| Vec::new(),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(OrchestratorError::CyclicPlan)));
    }

    #[tokio::test]
    async fn parallel_reports_partial_failure() {
        let orchestrator = orchestrator();
        // No agents means dispatch fails for every node.
        let result = orchestrator
            .run_parallel(
                vec![node()],
                &[],
                0,
                &crate::dispatcher::StaticLoad(Map::new()),
                &|_state| Vec::new(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(result.partial_failure);
    }
}
