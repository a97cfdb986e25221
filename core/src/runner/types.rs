use serde::{Deserialize, Serialize};

/// Exit code reported when the command ended without one (killed, lost channel).
pub const NO_EXIT_CODE: i32 = -255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Suspend,
    Resume,
    Interrupt,
    Kill,
}

impl Signal {
    /// POSIX signal number, as passed to `kill -N`.
    pub fn number(self) -> i32 {
        match self {
            Signal::Suspend => 19,
            Signal::Resume => 18,
            Signal::Interrupt => 2,
            Signal::Kill => 9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub duration_ms: u64,
    pub lines: u64,
    pub cancelled: bool,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.cancelled
    }
}
