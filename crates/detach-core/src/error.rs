//! Error types for detach-core.
//!
//! Failures on the original caller's side propagate as ordinary `Err` values.
//! Failures inside the intermediate child or the final daemon have no caller to
//! return to; they are reported on the process's own stderr and end that process.

use nix::errno::Errno;

use crate::redirect::StdStream;

/// Result type alias for detachment operations.
pub type Result<T> = std::result::Result<T, DetachError>;

/// Error type for the detachment protocol and detached spawning.
#[derive(Debug, thiserror::Error)]
pub enum DetachError {
    /// `fork(2)` failed.
    #[error("fork failed: {0}")]
    Fork(Errno),

    /// `setsid(2)` failed in the intermediate child.
    #[error("setsid failed: {0}")]
    Session(Errno),

    /// Waiting for the intermediate child failed.
    #[error("waitpid({pid}) failed: {source}")]
    Wait {
        /// PID of the intermediate child.
        pid: i32,
        /// Underlying errno.
        source: Errno,
    },

    /// A descriptor could not be closed for a reason other than `EBADF`.
    #[error("failed to close file descriptor {fd}: {source}")]
    CloseFd {
        /// The descriptor that failed to close.
        fd: i32,
        /// Underlying errno.
        source: Errno,
    },

    /// An excluded descriptor could not be marked inheritable across `exec`.
    #[error("failed to keep file descriptor {fd} open across exec: {source}")]
    InheritFd {
        /// The excluded descriptor.
        fd: i32,
        /// Underlying errno.
        source: Errno,
    },

    /// A standard stream could not be redirected.
    #[error("failed to redirect {stream}: {source}")]
    Redirect {
        /// The stream being redirected.
        stream: StdStream,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The detached command could not be launched.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// Display form of the command.
        command: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The shared PID cell was empty after the intermediate child exited.
    #[error("detached process did not report a pid")]
    MissingPid,

    /// Querying `RLIMIT_NOFILE` failed.
    #[error("failed to query descriptor limit: {0}")]
    FdLimit(Errno),

    /// The shared PID cell could not be mapped.
    #[error("failed to map shared pid cell: {0}")]
    SharedMemory(std::io::Error),

    /// Options failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DetachError {
    /// Creates an invalid configuration error.
    #[must_use]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Creates a spawn error.
    #[must_use]
    pub fn spawn(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            command: command.into(),
            source,
        }
    }
}
