use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ExecutionStatus;

/// Progress and status notifications published by the state manager.
///
/// Delivery is fire-and-forget; slow subscribers lag and drop events
/// instead of blocking producers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    JobSubmitted {
        job_id: String,
        user_id: String,
        task_count: usize,
        timestamp: DateTime<Utc>,
    },
    JobStatusChanged {
        job_id: String,
        user_id: String,
        old_status: ExecutionStatus,
        new_status: ExecutionStatus,
        timestamp: DateTime<Utc>,
    },
    TaskStatusChanged {
        job_id: String,
        task_id: String,
        old_status: ExecutionStatus,
        new_status: ExecutionStatus,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
    TaskProgress {
        job_id: String,
        task_id: String,
        percent: f32,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn job_id(&self) -> &str {
        match self {
            ExecutionEvent::JobSubmitted { job_id, .. }
            | ExecutionEvent::JobStatusChanged { job_id, .. }
            | ExecutionEvent::TaskStatusChanged { job_id, .. }
            | ExecutionEvent::TaskProgress { job_id, .. } => job_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ExecutionEvent::JobSubmitted { timestamp, .. }
            | ExecutionEvent::JobStatusChanged { timestamp, .. }
            | ExecutionEvent::TaskStatusChanged { timestamp, .. }
            | ExecutionEvent::TaskProgress { timestamp, .. } => *timestamp,
        }
    }
}
