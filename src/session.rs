//! C10 — Coordination Session.
//!
//! A named session with declared isolation and a concurrency-slot cap,
//! plus a priority-ordered assignment queue for worker-pool fairness.

use crate::config::SessionConfig;
use crate::event_bus::EventBus;
use crate::types::error::SessionError;
use crate::types::event::{event_type, Event};
use crate::types::ids::{AgentId, SessionId};
use crate::types::task::{AgentSpec, Task};
use crate::types::{IsolationLevel, Priority};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Heap entry ordering tasks by `(priority, enqueued_at)` so that, within a
/// priority tier, earlier-enqueued tasks win — the worker-pool fairness
/// resolution for the capacity-constrained assignment queue.
#[derive(Debug)]
struct QueuedAssignment {
    priority: Priority,
    enqueued_at: u64,
    task: Task,
}

impl PartialEq for QueuedAssignment {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.enqueued_at == other.enqueued_at
    }
}

impl Eq for QueuedAssignment {}

impl Ord for QueuedAssignment {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
    }
}

impl PartialOrd for QueuedAssignment {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct RegisteredAgent {
    spec: AgentSpec,
    active_operations: u32,
}

pub struct CoordinationSession {
    pub id: SessionId,
    pub isolation: IsolationLevel,
    config: SessionConfig,
    agents: RwLock<HashMap<AgentId, RegisteredAgent>>,
    allow_list: RwLock<HashSet<AgentId>>,
    pending: RwLock<BinaryHeap<QueuedAssignment>>,
    sequence: AtomicU64,
    bus: EventBus,
}

impl CoordinationSession {
    pub fn new(isolation: IsolationLevel, config: SessionConfig, bus: EventBus) -> Self {
        Self {
            id: SessionId::new(),
            isolation,
            config,
            agents: RwLock::new(HashMap::new()),
            allow_list: RwLock::new(HashSet::new()),
            pending: RwLock::new(BinaryHeap::new()),
            sequence: AtomicU64::new(0),
            bus,
        }
    }

    pub async fn allow(&self, agent_id: AgentId) {
        self.allow_list.write().await.insert(agent_id);
    }

    /// Duplicate registration is rejected. Under `Strict` isolation the
    /// agent must be allow-listed or meet `trust_floor`.
    pub async fn register_agent(
        &self,
        spec: AgentSpec,
        trust_floor: u8,
    ) -> Result<(), SessionError> {
        let mut agents = self.agents.write().await;
        if agents.contains_key(&spec.id) {
            return Err(SessionError::DuplicateRegistration(spec.id));
        }

        if self.isolation == IsolationLevel::Strict {
            let allowed = self.allow_list.read().await.contains(&spec.id);
            if !allowed && spec.trust_level < trust_floor {
                return Err(SessionError::TrustFloorNotMet);
            }
        }

        let agent_id = spec.id;
        agents.insert(
            agent_id,
            RegisteredAgent {
                spec,
                active_operations: 0,
            },
        );
        drop(agents);

        let _ = self.bus.publish(Event::new(
            event_type::SESSION_CREATED,
            "coordination_session",
            None,
            serde_json::json!({ "sessionId": self.id.to_string(), "agentId": agent_id.to_string() }),
        ));
        Ok(())
    }

    /// Assign `task` to `agent_id`, holding a concurrency slot for the
    /// duration of the caller's work; returns a guard that releases the
    /// slot on drop.
    pub async fn assign_task(
        &self,
        task: &Task,
        agent_id: AgentId,
    ) -> Result<AssignmentGuard<'_>, SessionError> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(&agent_id)
            .ok_or(SessionError::NotRegistered(agent_id))?;

        if agent.active_operations >= self.config.max_concurrent_operations as u32 {
            return Err(SessionError::NoCapacity);
        }
        agent.active_operations += 1;
        drop(agents);

        let _ = self.bus.publish(Event::new(
            event_type::TASK_ASSIGNED,
            "coordination_session",
            Some(task.correlation_id),
            serde_json::json!({ "taskId": task.id.to_string(), "agentId": agent_id.to_string() }),
        ));

        Ok(AssignmentGuard {
            session: self,
            agent_id,
        })
    }

    /// Enqueue a task for later assignment by priority, breaking ties by
    /// arrival order (Open Question (b) resolution).
    pub async fn enqueue(&self, task: Task) {
        let enqueued_at = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.pending.write().await.push(QueuedAssignment {
            priority: task.priority,
            enqueued_at,
            task,
        });
    }

    pub async fn dequeue_next(&self) -> Option<Task> {
        self.pending.write().await.pop().map(|q| q.task)
    }

    pub async fn active_operations(&self, agent_id: AgentId) -> u32 {
        self.agents
            .read()
            .await
            .get(&agent_id)
            .map(|a| a.active_operations)
            .unwrap_or(0)
    }

    async fn release(&self, agent_id: AgentId) {
        if let Some(agent) = self.agents.write().await.get_mut(&agent_id) {
            agent.active_operations = agent.active_operations.saturating_sub(1);
        }
    }
}

/// Releases the agent's concurrency slot explicitly rather than on `Drop`,
/// since the release itself needs to take an async lock.
pub struct AssignmentGuard<'a> {
    session: &'a CoordinationSession,
    agent_id: AgentId,
}

impl<'a> AssignmentGuard<'a> {
    pub async fn release(self) {
        self.session.release(self.agent_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use crate::types::ids::CorrelationId;
    use crate::types::task::Budget;

    fn bus() -> EventBus {
        EventBus::new(&BusConfig::default())
    }

    fn spec(trust: u8) -> AgentSpec {
        AgentSpec {
            id: AgentId::new(),
            name: "a".into(),
            capabilities: vec![],
            trust_level: trust,
            model_targets: vec![],
            tools: vec![],
            specialization: "general".into(),
            isolation: IsolationLevel::Moderate,
        }
    }

    fn task() -> Task {
        Task {
            id: crate::types::ids::TaskId::new(),
            kind: "t".into(),
            input: serde_json::json!({}),
            budget: Budget::default(),
            required_capabilities: vec![],
            priority: Priority::default(),
            correlation_id: CorrelationId::new(),
        }
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let session = CoordinationSession::new(IsolationLevel::Moderate, SessionConfig::default(), bus());
        let agent = spec(5);
        session.register_agent(agent.clone(), 0).await.unwrap();
        assert!(matches!(
            session.register_agent(agent, 0).await,
            Err(SessionError::DuplicateRegistration(_))
        ));
    }

    #[tokio::test]
    async fn strict_isolation_requires_trust_floor_or_allow_list() {
        let session = CoordinationSession::new(IsolationLevel::Strict, SessionConfig::default(), bus());
        let low_trust = spec(1);
        assert!(matches!(
            session.register_agent(low_trust, 5).await,
            Err(SessionError::TrustFloorNotMet)
        ));
    }

    #[tokio::test]
    async fn strict_isolation_allow_listed_agent_bypasses_trust_floor() {
        let session = CoordinationSession::new(IsolationLevel::Strict, SessionConfig::default(), bus());
        let low_trust = spec(1);
        session.allow(low_trust.id).await;
        assert!(session.register_agent(low_trust, 5).await.is_ok());
    }

    #[tokio::test]
    async fn assignment_respects_concurrency_cap() {
        let config = SessionConfig {
            max_concurrent_operations: 1,
        };
        let session = CoordinationSession::new(IsolationLevel::Moderate, config, bus());
        let agent = spec(5);
        session.register_agent(agent.clone(), 0).await.unwrap();
        let _guard = session.assign_task(&task(), agent.id).await.unwrap();
        assert!(session.assign_task(&task(), agent.id).await.is_err());
    }

    #[tokio::test]
    async fn releasing_guard_frees_slot() {
        let config = SessionConfig {
            max_concurrent_operations: 1,
        };
        let session = CoordinationSession::new(IsolationLevel::Moderate, config, bus());
        let agent = spec(5);
        session.register_agent(agent.clone(), 0).await.unwrap();
        let guard = session.assign_task(&task(), agent.id).await.unwrap();
        guard.release().await;
        assert!(session.assign_task(&task(), agent.id).await.is_ok());
    }

    #[tokio::test]
    async fn higher_priority_dequeues_first() {
        let session = CoordinationSession::new(IsolationLevel::Moderate, SessionConfig::default(), bus());
        let mut low = task();
        low.priority = Priority::Low;
        let mut high = task();
        high.priority = Priority::Critical;
        session.enqueue(low).await;
        session.enqueue(high.clone()).await;
        let next = session.dequeue_next().await.unwrap();
        assert_eq!(next.id, high.id);
    }
}
