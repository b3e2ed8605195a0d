//! Process exit reasons.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a process terminated.
///
/// Carried by every `Down` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// The process function returned.
    Normal,
    /// The node is shutting down.
    Shutdown,
    /// The process was stopped from outside.
    Killed,
    /// The monitored process did not exist when the monitor was set up.
    NoProc,
    /// The node hosting the process is no longer reachable.
    NoConnection,
    /// The process failed.
    Error(String),
}

impl ExitReason {
    /// Create an `Error` reason from a message.
    pub fn error(msg: impl Into<String>) -> Self {
        ExitReason::Error(msg.into())
    }

    /// Returns `true` for `Normal` and `Shutdown`.
    pub fn is_normal(&self) -> bool {
        matches!(self, ExitReason::Normal | ExitReason::Shutdown)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Normal => write!(f, "normal"),
            ExitReason::Shutdown => write!(f, "shutdown"),
            ExitReason::Killed => write!(f, "killed"),
            ExitReason::NoProc => write!(f, "noproc"),
            ExitReason::NoConnection => write!(f, "noconnection"),
            ExitReason::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}
