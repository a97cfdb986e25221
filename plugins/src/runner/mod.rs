pub mod process;
pub mod ssh;

pub use process::{signal_process_group, LocalProcessRunner};
pub use ssh::{SshInvocation, SshRunner};
