use std::fmt;

use serde::{Deserialize, Serialize};

/// Status shared by job runs and task runs.
///
/// Statuses fall into three groups used by every transition rule:
/// - pending: suspended until an external trigger arrives
/// - active: eligible for handoff to the dispatcher
/// - finished: terminal, no outgoing transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Unstarted,
    InProgress,
    PendingConfirmations,
    PendingConnection,
    PendingBridge,
    Completed,
    Errored,
    Cancelled,
}

impl RunStatus {
    pub const PENDING: [RunStatus; 3] = [
        RunStatus::PendingConfirmations,
        RunStatus::PendingConnection,
        RunStatus::PendingBridge,
    ];

    pub const FINISHED: [RunStatus; 3] =
        [RunStatus::Completed, RunStatus::Errored, RunStatus::Cancelled];

    pub fn is_pending(self) -> bool {
        Self::PENDING.contains(&self)
    }

    pub fn is_pending_confirmations(self) -> bool {
        self == RunStatus::PendingConfirmations
    }

    pub fn is_pending_connection(self) -> bool {
        self == RunStatus::PendingConnection
    }

    pub fn is_pending_bridge(self) -> bool {
        self == RunStatus::PendingBridge
    }

    pub fn is_active(self) -> bool {
        self == RunStatus::InProgress
    }

    pub fn is_finished(self) -> bool {
        Self::FINISHED.contains(&self)
    }

    pub fn is_errored(self) -> bool {
        self == RunStatus::Errored
    }

    /// Position in the status lattice: unstarted, started (active or
    /// pending), finished.
    pub fn tier(self) -> u8 {
        match self {
            RunStatus::Unstarted => 0,
            RunStatus::InProgress
            | RunStatus::PendingConfirmations
            | RunStatus::PendingConnection
            | RunStatus::PendingBridge => 1,
            RunStatus::Completed | RunStatus::Errored | RunStatus::Cancelled => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the lattice monotonic.
    ///
    /// Staying put is always allowed. Finished statuses accept nothing else,
    /// and nothing may go back to `Unstarted`.
    pub fn can_advance_to(self, next: RunStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_finished() {
            return false;
        }
        next.tier() >= self.tier() && next != RunStatus::Unstarted
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Unstarted => "unstarted",
            RunStatus::InProgress => "in_progress",
            RunStatus::PendingConfirmations => "pending_confirmations",
            RunStatus::PendingConnection => "pending_connection",
            RunStatus::PendingBridge => "pending_bridge",
            RunStatus::Completed => "completed",
            RunStatus::Errored => "errored",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}
