//! Process roles produced by the double fork, and the exit decision.

use std::fmt;

/// Which of the three processes created by [`Detach::enter`](crate::Detach::enter)
/// the current process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The process that entered the scope. Knows the daemon's PID.
    Original,

    /// The short-lived session leader between the two forks.
    ///
    /// Records the daemon's PID and exits without running caller code, so
    /// caller code never observes this role. It exists so the exit decision
    /// covers all three processes.
    Intermediate,

    /// The detached grandchild. Does not know its own reported PID.
    Daemon,
}

/// What a process does when it leaves the detachment scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    /// Return to the code following the scope.
    Continue,
    /// Report any failure and exit immediately.
    Terminate,
}

impl Role {
    /// Decide what this role does when the scope ends.
    ///
    /// Only the original process of a non-daemonizing request resumes after
    /// the scope. The daemon always terminates, and with `daemonize` the
    /// original terminates too since its only job was orchestration.
    #[must_use]
    pub const fn exit_action(self, daemonize: bool) -> ExitAction {
        match self {
            Self::Original if !daemonize => ExitAction::Continue,
            Self::Original | Self::Intermediate | Self::Daemon => ExitAction::Terminate,
        }
    }

    /// Whether this is the process that made the request, as opposed to a
    /// forked copy of it.
    #[must_use]
    pub const fn is_caller(self) -> bool {
        matches!(self, Self::Original)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Original => write!(f, "original"),
            Self::Intermediate => write!(f, "intermediate"),
            Self::Daemon => write!(f, "daemon"),
        }
    }
}
