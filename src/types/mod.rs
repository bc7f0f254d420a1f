//! Core types and data structures for the agent runtime core.

pub mod error;
pub mod event;
pub mod ids;
pub mod task;

pub use error::*;
pub use event::*;
pub use ids::*;
pub use task::*;

use serde::{Deserialize, Serialize};

/// Agent scheduling priority. Orders the coordination session's ready queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

/// Isolation policy attached to a coordination session (C10) and to an
/// `AgentSpec` (C3's data model, §3). Controls which agents may join a
/// session and what trust floor is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum IsolationLevel {
    Strict,
    #[default]
    Moderate,
    Relaxed,
}

impl IsolationLevel {
    /// Minimum `trustLevel` (0..=10) an agent must carry to participate
    /// under this isolation level absent an explicit allow-list entry.
    pub fn trust_floor(self) -> u8 {
        match self {
            IsolationLevel::Strict => 8,
            IsolationLevel::Moderate => 4,
            IsolationLevel::Relaxed => 0,
        }
    }
}

/// A free-form capability tag describing what an agent can do
/// (e.g. `code-analysis`, `documentation`).
pub type Capability = String;
