//! Status transition rules and group/job status reduction.

use thiserror::Error;

use crate::model::{ExecutionStatus, TransitionBehavior};

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
    #[error("cannot transition from terminal state {state}")]
    FromTerminalState { state: ExecutionStatus },
}

pub struct StateTransition;

impl StateTransition {
    /// Checks a task-level transition.
    ///
    /// Statuses only move forward along
    /// `UNDETERMINED < QUEUED_ACTIVE < RUNNING < SUSPENDED < terminal`, except that a
    /// suspended task may be resumed (`RUNNING`) or released back to the queue.
    /// `DONE` is only reachable from `RUNNING`.
    pub fn validate(from: ExecutionStatus, to: ExecutionStatus) -> Result<(), TransitionError> {
        if Self::is_terminal(from) {
            return Err(TransitionError::FromTerminalState { state: from });
        }
        if from == to {
            return Ok(());
        }

        let is_valid = match (from, to) {
            (_, ExecutionStatus::Undetermined) => false,
            (ExecutionStatus::Running, ExecutionStatus::Done) => true,
            (_, ExecutionStatus::Done) => false,
            (
                ExecutionStatus::Suspended,
                ExecutionStatus::Running | ExecutionStatus::QueuedActive,
            ) => true,
            _ => rank(to) > rank(from),
        };

        if is_valid {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition { from, to })
        }
    }

    /// Groups and jobs take whatever their reduction yields, but terminal
    /// states stay absorbing.
    pub fn validate_reduced(
        from: ExecutionStatus,
        to: ExecutionStatus,
    ) -> Result<(), TransitionError> {
        if Self::is_terminal(from) && from != to {
            return Err(TransitionError::FromTerminalState { state: from });
        }
        Ok(())
    }

    pub fn is_terminal(status: ExecutionStatus) -> bool {
        status.is_terminal()
    }

    /// Status of a group derived from the statuses of its direct children.
    pub fn reduce_group(
        behavior: TransitionBehavior,
        children: &[ExecutionStatus],
    ) -> ExecutionStatus {
        if children.is_empty() {
            return ExecutionStatus::Done;
        }
        if behavior == TransitionBehavior::FailOnError {
            if children.contains(&ExecutionStatus::Failed) {
                return ExecutionStatus::Failed;
            }
            if children.contains(&ExecutionStatus::Cancelled) {
                return ExecutionStatus::Cancelled;
            }
        }
        if let Some(active) = active_status(children) {
            return active;
        }
        match behavior {
            TransitionBehavior::FailOnError => ExecutionStatus::Done,
            TransitionBehavior::ContinueOnError => {
                if children.iter().all(|s| *s == ExecutionStatus::Cancelled) {
                    ExecutionStatus::Cancelled
                } else {
                    ExecutionStatus::Done
                }
            }
        }
    }

    /// Status of a job from its top-level tasks.
    ///
    /// `settled` tells whether every task below the job (nested ones included)
    /// is terminal; a job never turns terminal before that.
    pub fn reduce_job(top_level: &[ExecutionStatus], settled: bool) -> ExecutionStatus {
        if let Some(active) = active_status(top_level) {
            return active;
        }
        if !settled {
            return ExecutionStatus::Running;
        }
        if top_level.contains(&ExecutionStatus::Failed) {
            ExecutionStatus::Failed
        } else if top_level.contains(&ExecutionStatus::Cancelled) {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Done
        }
    }
}

fn rank(status: ExecutionStatus) -> u8 {
    match status {
        ExecutionStatus::Undetermined => 0,
        ExecutionStatus::QueuedActive => 1,
        ExecutionStatus::Running => 2,
        ExecutionStatus::Suspended => 3,
        ExecutionStatus::Done | ExecutionStatus::Failed | ExecutionStatus::Cancelled => 4,
    }
}

/// Aggregate of the non-terminal members, or `None` when all are terminal.
fn active_status(statuses: &[ExecutionStatus]) -> Option<ExecutionStatus> {
    let active: Vec<ExecutionStatus> = statuses
        .iter()
        .copied()
        .filter(|s| !s.is_terminal())
        .collect();
    if active.is_empty() {
        return None;
    }
    let status = if active.contains(&ExecutionStatus::Running) {
        ExecutionStatus::Running
    } else if active.contains(&ExecutionStatus::Suspended) {
        ExecutionStatus::Suspended
    } else if active.len() < statuses.len() {
        // some members already finished, the rest wait for their turn
        ExecutionStatus::Running
    } else if active.contains(&ExecutionStatus::QueuedActive) {
        ExecutionStatus::QueuedActive
    } else {
        ExecutionStatus::Undetermined
    };
    Some(status)
}
