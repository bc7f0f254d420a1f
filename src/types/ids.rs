//! Newtype UUID identifiers, one per entity kind.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(AgentId);
uuid_id!(TaskId);
uuid_id!(RequestId);
uuid_id!(StepId);
uuid_id!(SessionId);
uuid_id!(AuditId);
uuid_id!(CorrelationId);
uuid_id!(SubscriptionId);
