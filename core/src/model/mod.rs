//! Data model for jobs, tasks, groups and cluster nodes.

pub mod arena;
pub mod component;
pub mod job;
pub mod node;
pub mod status;
pub mod task;

pub use arena::TaskArena;
pub use component::{ContainerRef, ProcessingComponent};
pub use job::{ExecutionJob, JobSpec, TaskSpec};
pub use node::{NodeDescription, NodeRole, NodeServiceStatus, ServiceStatus, ToolInstallStatus};
pub use status::{ExecutionStatus, TransitionBehavior};
pub use task::{ExecutionTask, ResourceUsage, TaskKind};

pub type JobId = String;
pub type TaskId = String;
pub type UserId = String;
