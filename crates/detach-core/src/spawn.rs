//! Detached spawning of external commands.
//!
//! Same protocol as the controller, with the second fork performed by
//! `std::process::Command`: the intermediate child becomes a session leader,
//! closes inherited descriptors, points its standard streams at the targets
//! and launches the command. The command's own PID travels back through the
//! shared cell.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

use nix::unistd::{ForkResult, Pid, setsid};

use crate::config::{DetachOptions, StdioTargets};
use crate::controller::or_terminate;
use crate::error::{DetachError, Result};
use crate::fd;
use crate::process::{fork_process, reap, terminate};
use crate::redirect;
use crate::role::Role;
use crate::shared::SharedPid;

/// Shell used for [`CommandSpec::Shell`] and `shell(true)`.
pub const SHELL: &str = "/bin/sh";

type PreExecHook = Box<dyn FnMut() -> io::Result<()> + Send + Sync + 'static>;

/// The command to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSpec {
    /// Program followed by its arguments.
    Argv(Vec<OsString>),
    /// A command line run with `/bin/sh -c`.
    Shell(OsString),
}

impl CommandSpec {
    /// Command from a program and its arguments.
    pub fn argv<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self::Argv(args.into_iter().map(Into::into).collect())
    }

    /// Command line for the shell.
    pub fn shell(command: impl Into<OsString>) -> Self {
        Self::Shell(command.into())
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Argv(args) if args.is_empty() => {
                Err(DetachError::invalid_config("command has no program"))
            }
            Self::Shell(line) if line.is_empty() => {
                Err(DetachError::invalid_config("shell command is empty"))
            }
            Self::Argv(_) | Self::Shell(_) => Ok(()),
        }
    }

    /// Build the `std` command. With `shell`, an argument vector is handed to
    /// `sh -c` as the script followed by its positional parameters.
    fn to_command(&self, shell: bool) -> Command {
        match self {
            Self::Shell(line) => {
                let mut command = Command::new(SHELL);
                command.arg("-c").arg(line);
                command
            }
            Self::Argv(args) if shell => {
                let mut command = Command::new(SHELL);
                command.arg("-c").args(args);
                command
            }
            Self::Argv(args) => {
                let (program, rest) = args.split_first().map_or_else(
                    || (OsStr::new(""), &[][..]),
                    |(program, rest)| (program.as_os_str(), rest),
                );
                let mut command = Command::new(program);
                command.args(rest);
                command
            }
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Argv(args) => {
                let words: Vec<_> = args.iter().map(|a| a.to_string_lossy()).collect();
                write!(f, "{}", words.join(" "))
            }
            Self::Shell(line) => write!(f, "{SHELL} -c {}", line.to_string_lossy()),
        }
    }
}

/// A detached spawn request.
///
/// Descriptors are always closed in the intermediate child; stream targets,
/// the standard slots and explicit exclusions survive.
pub struct SpawnConfig<'fd> {
    command: CommandSpec,
    stdio: StdioTargets<'fd>,
    options: DetachOptions,
    shell: bool,
    current_dir: Option<PathBuf>,
    env: Option<Vec<(OsString, OsString)>>,
    pre_exec: Option<PreExecHook>,
}

impl<'fd> SpawnConfig<'fd> {
    /// Request to launch `command` with streams on the null device.
    #[must_use]
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            stdio: StdioTargets::default(),
            options: DetachOptions {
                close_fds: true,
                ..DetachOptions::default()
            },
            shell: false,
            current_dir: None,
            env: None,
            pre_exec: None,
        }
    }

    /// The command to launch.
    #[must_use]
    pub const fn command(&self) -> &CommandSpec {
        &self.command
    }

    /// Redirect the command's standard output to `target`.
    #[must_use]
    pub fn stdout<F: AsFd + ?Sized>(mut self, target: &'fd F) -> Self {
        self.stdio.stdout = Some(target.as_fd());
        self
    }

    /// Redirect the command's standard error to `target`.
    #[must_use]
    pub fn stderr<F: AsFd + ?Sized>(mut self, target: &'fd F) -> Self {
        self.stdio.stderr = Some(target.as_fd());
        self
    }

    /// Feed the command's standard input from `target`.
    #[must_use]
    pub fn stdin<F: AsFd + ?Sized>(mut self, target: &'fd F) -> Self {
        self.stdio.stdin = Some(target.as_fd());
        self
    }

    /// Exit the calling process with status 0 once the command's PID is
    /// known.
    ///
    /// The exit goes through [`std::process::exit`], so `atexit` handlers run
    /// and Rust's stdout is flushed, but destructors on the caller's stack do
    /// not run. Flush any buffered writers before calling [`spawn`].
    #[must_use]
    pub fn daemonize(mut self, value: bool) -> Self {
        self.options.daemonize = value;
        self
    }

    /// Run an argument vector through `/bin/sh -c`.
    #[must_use]
    pub fn shell(mut self, value: bool) -> Self {
        self.shell = value;
        self
    }

    /// Working directory of the command.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Replace the command's environment with `vars`.
    #[must_use]
    pub fn env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        self.env = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Keep `handle`'s descriptor open for the command. `FD_CLOEXEC` is
    /// cleared on it in the intermediate child, so the command inherits it.
    #[must_use]
    pub fn exclude<F: AsFd + ?Sized>(mut self, handle: &'fd F) -> Self {
        self.options.exclude_fds.push(handle.as_fd().as_raw_fd());
        self
    }

    /// Keep a raw descriptor open for the command.
    #[must_use]
    pub fn exclude_raw(mut self, fd: RawFd) -> Self {
        self.options.exclude_fds.push(fd);
        self
    }

    /// Close descriptors below `value` only, without querying the limit.
    #[must_use]
    pub fn max_fd(mut self, value: RawFd) -> Self {
        self.options.max_fd = Some(value);
        self
    }

    /// Ceiling used when the descriptor limit is unbounded.
    #[must_use]
    pub fn fallback_max_fd(mut self, value: RawFd) -> Self {
        self.options.fallback_max_fd = value;
        self
    }

    /// Run `hook` in the command's process just before `exec`.
    ///
    /// # Safety
    /// Same contract as [`CommandExt::pre_exec`]: the hook runs in a forked
    /// child and must restrict itself to async-signal-safe operations.
    #[must_use]
    pub unsafe fn pre_exec<F>(mut self, hook: F) -> Self
    where
        F: FnMut() -> io::Result<()> + Send + Sync + 'static,
    {
        self.pre_exec = Some(Box::new(hook));
        self
    }

    fn kept_fds(&self) -> std::collections::BTreeSet<RawFd> {
        [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO]
            .into_iter()
            .chain(self.options.exclude_fds.iter().copied())
            .chain(self.stdio.raw_fds())
            .collect()
    }

    fn build_command(&mut self) -> Command {
        let mut command = self.command.to_command(self.shell);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        if let Some(vars) = &self.env {
            command.env_clear().envs(vars.iter().map(|(k, v)| (k, v)));
        }
        if let Some(hook) = self.pre_exec.take() {
            // SAFETY: the caller accepted the `pre_exec` contract when
            // registering the hook.
            unsafe {
                command.pre_exec(hook);
            }
        }
        command
    }
}

impl fmt::Debug for SpawnConfig<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnConfig")
            .field("command", &self.command)
            .field("stdio", &self.stdio)
            .field("options", &self.options)
            .field("shell", &self.shell)
            .field("current_dir", &self.current_dir)
            .field("env", &self.env)
            .field("pre_exec", &self.pre_exec.is_some())
            .finish()
    }
}

/// Launch a command fully detached from the calling process.
///
/// Returns the command's PID. With `daemonize`, the calling process exits
/// with status 0 through [`std::process::exit`] instead of returning.
///
/// A launch failure happens in the intermediate child, which reports it on
/// its redirected stderr and exits with status 1. The caller then sees
/// [`DetachError::MissingPid`].
///
/// ```rust,no_run
/// use detach_core::{CommandSpec, SpawnConfig, spawn};
///
/// let log = std::fs::File::create("/tmp/sleeper.log")?;
/// let pid = spawn(SpawnConfig::new(CommandSpec::argv(["sleep", "60"])).stdout(&log))?;
/// println!("sleep running as {pid}");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
///
/// # Errors
/// Invalid configuration, a failed `mmap`, `fork` or `waitpid`, or
/// [`DetachError::MissingPid`].
pub fn spawn(mut config: SpawnConfig<'_>) -> Result<u32> {
    config.command.validate()?;
    config.options.validate()?;
    let cell = SharedPid::new()?;

    match fork_process()? {
        ForkResult::Parent { child } => {
            let status = reap(child)?;
            let Some(pid) = cell.load() else {
                tracing::warn!(
                    intermediate = child.as_raw(),
                    ?status,
                    command = %config.command,
                    "detached command did not start"
                );
                return Err(DetachError::MissingPid);
            };
            tracing::info!(pid = pid.as_raw(), command = %config.command, "spawned detached command");
            if config.options.daemonize {
                std::process::exit(0)
            }
            Ok(pid.as_raw() as u32)
        }
        ForkResult::Child => {
            or_terminate(Role::Intermediate, setsid().map_err(DetachError::Session));
            or_terminate(Role::Intermediate, isolate(&config));
            let mut command = config.build_command();
            let child = or_terminate(
                Role::Intermediate,
                command
                    .spawn()
                    .map_err(|source| DetachError::spawn(config.command.to_string(), source)),
            );
            cell.store(Pid::from_raw(child.id() as i32));
            terminate(0)
        }
    }
}

/// Close inherited descriptors, make the exclusions survive `exec` and point
/// the standard streams at the targets, so the command inherits exactly
/// those.
fn isolate(config: &SpawnConfig<'_>) -> Result<()> {
    let max = fd::max_fd(&config.options)?;
    fd::close_open_fds(max, &config.kept_fds())?;
    for &excluded in &config.options.exclude_fds {
        fd::inherit_fd(excluded)?;
    }
    redirect::redirect_stdio(&config.stdio)
}
