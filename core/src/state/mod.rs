//! Job and task state machine.
//!
//! Task transitions are validated by [`StateTransition`]; group and job
//! statuses are never set directly but reduced from their children inside the
//! same critical section as the child change.

pub mod manager;
pub mod transitions;
pub mod types;

pub use manager::ExecutionStateManager;
pub use transitions::{StateTransition, TransitionError};
pub use types::ExecutionEvent;
