//! C6 — Dispatcher.
//!
//! Capability-subset matching with a deterministic tie-break chain, caching
//! decisions in C1 with a short TTL.

use crate::store::{BoundedStore, EvictionPolicy};
use crate::types::error::DispatchError;
use crate::types::ids::{AgentId, RequestId, TaskId};
use crate::types::task::{AgentSpec, Task};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub agent_id: AgentId,
    pub trust_level: u8,
    pub load: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchDecision {
    pub request_id: RequestId,
    pub task_id: TaskId,
    pub selected_agent: AgentId,
    pub candidates: Vec<Candidate>,
    pub applied_rules: Vec<String>,
    pub policy_version: u32,
}

pub const POLICY_VERSION: u32 = 1;

/// Reports an agent's current load for tie-break purposes.
pub trait LoadObserver: Send + Sync {
    fn load(&self, agent_id: AgentId) -> f32;
}

pub struct StaticLoad(pub HashMap<AgentId, f32>);

impl LoadObserver for StaticLoad {
    fn load(&self, agent_id: AgentId) -> f32 {
        self.0.get(&agent_id).copied().unwrap_or(0.0)
    }
}

pub struct Dispatcher {
    decisions: BoundedStore<RequestId, DispatchDecision>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            decisions: BoundedStore::new(
                EvictionPolicy::Ttl,
                &crate::config::StoreConfig {
                    max_size: 5_000,
                    default_ttl: Some(Duration::from_secs(60)),
                },
            ),
        }
    }

    /// Choose an agent for `task` from `agents`, ranked by: (1) capability
    /// superset, (2) highest trust level meeting `trust_floor`, (3) lowest
    /// observed load, (4) deterministic `(task.id, agent.id)` hash.
    pub fn dispatch(
        &self,
        task: &Task,
        agents: &[AgentSpec],
        trust_floor: u8,
        load: &dyn LoadObserver,
    ) -> Result<DispatchDecision, DispatchError> {
        let mut applied_rules = vec!["capability_subset".to_string()];
        let mut eligible: Vec<&AgentSpec> = agents
            .iter()
            .filter(|a| a.has_capabilities(&task.required_capabilities))
            .collect();

        if eligible.is_empty() {
            return Err(DispatchError::NoCandidate(
                task.required_capabilities.clone(),
            ));
        }

        applied_rules.push("trust_floor".to_string());
        eligible.retain(|a| a.trust_level >= trust_floor);
        if eligible.is_empty() {
            return Err(DispatchError::NoCandidate(
                task.required_capabilities.clone(),
            ));
        }

        let max_trust = eligible.iter().map(|a| a.trust_level).max().unwrap();
        eligible.retain(|a| a.trust_level == max_trust);

        applied_rules.push("lowest_load".to_string());
        let min_load = eligible
            .iter()
            .map(|a| load.load(a.id))
            .fold(f32::INFINITY, f32::min);
        eligible.retain(|a| (load.load(a.id) - min_load).abs() < f32::EPSILON);

        let selected = if eligible.len() == 1 {
            eligible[0]
        } else {
            applied_rules.push("stable_hash".to_string());
            eligible
                .iter()
                .min_by_key(|a| stable_hash(task.id, a.id))
                .copied()
                .unwrap()
        };

        let candidates = agents
            .iter()
            .filter(|a| a.has_capabilities(&task.required_capabilities))
            .map(|a| Candidate {
                agent_id: a.id,
                trust_level: a.trust_level,
                load: load.load(a.id),
            })
            .collect();

        let decision = DispatchDecision {
            request_id: RequestId::new(),
            task_id: task.id,
            selected_agent: selected.id,
            candidates,
            applied_rules,
            policy_version: POLICY_VERSION,
        };

        let _ = self.decisions.set(decision.request_id, decision.clone());
        Ok(decision)
    }

    pub fn explain(&self, request_id: RequestId) -> Result<DispatchDecision, DispatchError> {
        self.decisions
            .get(&request_id)
            .ok_or(DispatchError::DecisionNotFound(request_id))
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn stable_hash(task_id: TaskId, agent_id: AgentId) -> u64 {
    let mut hasher = DefaultHasher::new();
    task_id.0.hash(&mut hasher);
    agent_id.0.hash(&mut hasher);
    hasher.finish()
}
