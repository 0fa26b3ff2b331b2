//! The detachment controller: double fork, session detach, descriptor
//! cleanup and the role-dependent exit phase.
//!
//! ```text
//! original ──fork──► intermediate ──setsid, fork──► daemon
//!    │                    │                           │
//!    │ waitpid            │ store daemon pid          │ close fds
//!    │ load daemon pid    │ _exit(0)                  │ redirect stdio
//!    ▼                    ▼                           ▼
//! Role::Original       (never returns)             Role::Daemon
//! pid = Some(daemon)                               pid = None
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use nix::unistd::{ForkResult, Pid, setsid};

use crate::config::DetachConfig;
use crate::error::{DetachError, Result};
use crate::fd;
use crate::process::{fork_process, reap, report_failure, terminate};
use crate::redirect;
use crate::role::{ExitAction, Role};
use crate::shared::SharedPid;

/// State of one process after entering the detachment scope.
///
/// Exactly one of the processes created by [`Detach::enter`] holds a
/// `Detach` with no PID, and it is the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detach {
    role: Role,
    pid: Option<Pid>,
    daemonize: bool,
}

impl Detach {
    /// Fork twice and detach. Returns in the original process and in the
    /// daemon; the intermediate child exits inside this call.
    ///
    /// In the daemon, failures while closing descriptors or redirecting
    /// streams are reported on stderr and end the daemon with status 1. They
    /// never surface as `Err` there, since a half-prepared daemon must not
    /// run caller code.
    ///
    /// # Errors
    /// In the original process: invalid options, a failed `mmap`, `fork` or
    /// `waitpid`, or [`DetachError::MissingPid`] if the intermediate child
    /// died before recording the daemon's PID.
    pub fn enter(config: &DetachConfig<'_>) -> Result<Self> {
        let options = config.options();
        options.validate()?;
        let daemonize = options.daemonize;
        let cell = SharedPid::new()?;

        match fork_process()? {
            ForkResult::Parent { child } => {
                let status = reap(child)?;
                let Some(daemon) = cell.load() else {
                    tracing::warn!(intermediate = child.as_raw(), ?status, "no daemon pid recorded");
                    return Err(DetachError::MissingPid);
                };
                tracing::debug!(
                    intermediate = child.as_raw(),
                    daemon = daemon.as_raw(),
                    daemonize,
                    "detached"
                );
                Ok(Self {
                    role: Role::Original,
                    pid: Some(daemon),
                    daemonize,
                })
            }
            ForkResult::Child => {
                detach_session(&cell);
                drop(cell);
                or_terminate(Role::Daemon, prepare_daemon(config));
                Ok(Self {
                    role: Role::Daemon,
                    pid: None,
                    daemonize,
                })
            }
        }
    }

    /// PID of the daemon as seen by the original process, `None` in the
    /// daemon itself.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid.map(|pid| pid.as_raw() as u32)
    }

    /// The role of the current process.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Whether the current process is the daemon.
    #[must_use]
    pub const fn is_daemon(&self) -> bool {
        self.pid.is_none()
    }

    /// Whether the original process terminates when the scope ends.
    #[must_use]
    pub const fn daemonize(&self) -> bool {
        self.daemonize
    }

    /// What this process does when the scope ends.
    #[must_use]
    pub const fn exit_action(&self) -> ExitAction {
        self.role.exit_action(self.daemonize)
    }

    /// Leave the scope with the body's `outcome`.
    ///
    /// Returns `outcome` unchanged if this process continues. Otherwise a
    /// failed outcome is reported on stderr and the process exits with
    /// status 0.
    pub fn leave<T, E: fmt::Display>(
        self,
        outcome: std::result::Result<T, E>,
    ) -> std::result::Result<T, E> {
        match self.exit_action() {
            ExitAction::Continue => outcome,
            ExitAction::Terminate => {
                if let Err(error) = &outcome {
                    let context = format!("{} scope failed", self.role);
                    report_failure(self.role, &context, error);
                }
                terminate(0)
            }
        }
    }
}

/// Run `body` inside a detachment scope.
///
/// `body` runs in both the original process and the daemon; branch on
/// [`Detach::pid`] or [`Detach::is_daemon`]. Only the original process of a
/// non-daemonizing request returns from this function. A panic in `body` is
/// reported and ends a terminating process, and is resumed in the original.
///
/// ```rust,no_run
/// use detach_core::{DetachConfig, DetachError, detach};
///
/// let config = DetachConfig::builder().close_fds(true).build();
/// let pid = detach(&config, |scope| {
///     if scope.is_daemon() {
///         // long-running work
///     }
///     Ok::<_, DetachError>(scope.pid())
/// })?;
/// println!("daemon running as {pid:?}");
/// # Ok::<(), DetachError>(())
/// ```
pub fn detach<T, E, F>(config: &DetachConfig<'_>, body: F) -> std::result::Result<T, E>
where
    F: FnOnce(&Detach) -> std::result::Result<T, E>,
    E: From<DetachError> + fmt::Display,
{
    let scope = Detach::enter(config)?;
    match panic::catch_unwind(AssertUnwindSafe(|| body(&scope))) {
        Ok(outcome) => scope.leave(outcome),
        Err(payload) => {
            if scope.exit_action() == ExitAction::Terminate {
                report_failure(
                    scope.role,
                    &format!("{} scope panicked", scope.role),
                    &panic_message(payload.as_ref()),
                );
                terminate(0)
            }
            panic::resume_unwind(payload)
        }
    }
}

/// Intermediate child: become session leader, fork the daemon, record its
/// PID and exit. Returns only in the daemon.
fn detach_session(cell: &SharedPid) {
    or_terminate(Role::Intermediate, setsid().map_err(DetachError::Session));
    match or_terminate(Role::Intermediate, fork_process()) {
        ForkResult::Parent { child } => {
            cell.store(child);
            terminate(0)
        }
        ForkResult::Child => {}
    }
}

fn prepare_daemon(config: &DetachConfig<'_>) -> Result<()> {
    let options = config.options();
    if options.close_fds {
        let max = fd::max_fd(options)?;
        fd::close_open_fds(max, &config.excluded_fds())?;
    }
    redirect::redirect_stdio(config.stdio())
}

/// Unwrap `result` in a process that has no caller to return an error to.
pub(crate) fn or_terminate<T>(role: Role, result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(error) => {
            report_failure(role, &role.to_string(), &error);
            terminate(1)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
