use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::JobSpecId;

/// What kind of event started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitiatorKind {
    /// Manual execution request.
    Web,
    /// On-chain log addressed to this node.
    RunLog,
    /// Any on-chain log matching a filter.
    EthLog,
    Cron,
    RunAt,
    External,
}

impl std::fmt::Display for InitiatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InitiatorKind::Web => "web",
            InitiatorKind::RunLog => "runlog",
            InitiatorKind::EthLog => "ethlog",
            InitiatorKind::Cron => "cron",
            InitiatorKind::RunAt => "runat",
            InitiatorKind::External => "external",
        };
        f.write_str(s)
    }
}

/// Describes the event that triggered a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Initiator {
    pub kind: InitiatorKind,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl Initiator {
    pub fn new(kind: InitiatorKind) -> Self {
        Self {
            kind,
            params: Map::new(),
        }
    }

    pub fn web() -> Self {
        Self::new(InitiatorKind::Web)
    }
}

/// One step of a job spec's task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Adapter name, e.g. `httpget` or a bridge name.
    pub task_type: String,
    /// Blocks that must be observed past the run's creation height before
    /// this task may start.
    #[serde(default)]
    pub confirmations: u64,
    /// Task needs a live chain connection to start.
    #[serde(default)]
    pub requires_connection: bool,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl TaskSpec {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            confirmations: 0,
            requires_connection: false,
            params: Map::new(),
        }
    }

    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations;
        self
    }

    pub fn requiring_connection(mut self) -> Self {
        self.requires_connection = true;
        self
    }
}

/// Template that runs are instantiated from.
///
/// Only `archived_at` ever changes after creation, and only once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub id: JobSpecId,
    #[serde(default)]
    pub initiators: Vec<Initiator>,
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
}

impl JobSpec {
    pub fn new(tasks: Vec<TaskSpec>) -> Self {
        Self {
            id: JobSpecId::new(),
            initiators: vec![Initiator::web()],
            tasks,
            starts_at: None,
            ends_at: None,
            created_at: Utc::now(),
            archived_at: None,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Sets the archived flag. Archiving twice keeps the first timestamp.
    pub fn archive(&mut self) {
        if self.archived_at.is_none() {
            self.archived_at = Some(Utc::now());
        }
    }
}

/// Run-scoped parameters supplied by whoever requested the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub requester: Option<String>,
    /// Fee offered for the run, in the smallest token unit.
    #[serde(default)]
    pub payment: Option<u64>,
}

impl RunRequest {
    pub fn with_payment(payment: u64) -> Self {
        Self {
            payment: Some(payment),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_is_one_way_and_keeps_first_stamp() {
        let mut spec = JobSpec::new(vec![TaskSpec::new("noop")]);
        assert!(!spec.is_archived());
        spec.archive();
        let first = spec.archived_at;
        spec.archive();
        assert!(spec.is_archived());
        assert_eq!(spec.archived_at, first);
    }

    #[test]
    fn spec_deserializes_with_defaults() {
        let json = r#"{
            "tasks": [
                {"task_type": "ethtx", "confirmations": 3, "requires_connection": true},
                {"task_type": "httppost"}
            ]
        }"#;
        let spec: JobSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.tasks.len(), 2);
        assert_eq!(spec.tasks[0].confirmations, 3);
        assert!(spec.tasks[0].requires_connection);
        assert_eq!(spec.tasks[1].confirmations, 0);
        assert!(!spec.is_archived());
        assert!(spec.initiators.is_empty());
    }

    #[test]
    fn initiator_kind_display() {
        assert_eq!(InitiatorKind::RunLog.to_string(), "runlog");
        assert_eq!(Initiator::web().kind.to_string(), "web");
    }
}
