//! Trigger event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of stimulus fed to the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Code was pushed to a branch
    Push,

    /// A recurring schedule fired
    ScheduledTick,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Push => write!(f, "push"),
            EventKind::ScheduledTick => write!(f, "scheduled tick"),
        }
    }
}

/// An inbound event evaluated against workflow triggers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: EventKind,
    pub branch: String,
    pub timestamp: DateTime<Utc>,
}

impl TriggerEvent {
    /// A push to `branch`, stamped with the current time
    pub fn push(branch: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Push,
            branch: branch.into(),
            timestamp: Utc::now(),
        }
    }

    /// A schedule tick at `timestamp` for `branch`
    pub fn scheduled_tick(branch: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: EventKind::ScheduledTick,
            branch: branch.into(),
            timestamp,
        }
    }
}
