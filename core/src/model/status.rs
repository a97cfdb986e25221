use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state shared by jobs, tasks and groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Undetermined,
    QueuedActive,
    Running,
    Suspended,
    Done,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn value(self) -> i32 {
        match self {
            ExecutionStatus::Undetermined => 0,
            ExecutionStatus::QueuedActive => 1,
            ExecutionStatus::Running => 2,
            ExecutionStatus::Suspended => 3,
            ExecutionStatus::Done => 4,
            ExecutionStatus::Failed => 5,
            ExecutionStatus::Cancelled => 6,
        }
    }

    pub fn from_value(value: i32) -> Option<Self> {
        Some(match value {
            0 => ExecutionStatus::Undetermined,
            1 => ExecutionStatus::QueuedActive,
            2 => ExecutionStatus::Running,
            3 => ExecutionStatus::Suspended,
            4 => ExecutionStatus::Done,
            5 => ExecutionStatus::Failed,
            6 => ExecutionStatus::Cancelled,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Done | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Undetermined => "UNDETERMINED",
            ExecutionStatus::QueuedActive => "QUEUED_ACTIVE",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Suspended => "SUSPENDED",
            ExecutionStatus::Done => "DONE",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// How a group reacts when one of its children fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionBehavior {
    #[default]
    FailOnError,
    ContinueOnError,
}

impl TransitionBehavior {
    pub fn value(self) -> i32 {
        match self {
            TransitionBehavior::FailOnError => 1,
            TransitionBehavior::ContinueOnError => 2,
        }
    }
}
