//! Configuration for a detachment request.
//!
//! A request has two halves. [`DetachOptions`] is plain data that can be
//! loaded from TOML. [`StdioTargets`] borrows the handles the daemon's
//! standard streams are redirected to, so they cannot be closed while the
//! request is alive.
//!
//! ```rust
//! use detach_core::DetachConfig;
//!
//! let log = std::fs::File::create(std::env::temp_dir().join("daemon.log"))?;
//! let config = DetachConfig::builder()
//!     .stdout(&log)
//!     .close_fds(true)
//!     .build();
//! assert!(config.options().close_fds);
//! # Ok::<(), std::io::Error>(())
//! ```

use std::collections::BTreeSet;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DetachError, Result};

/// Upper bound for descriptor closing when `RLIMIT_NOFILE` is unlimited.
pub const DEFAULT_FALLBACK_MAX_FD: RawFd = 2048;

fn default_fallback_max_fd() -> RawFd {
    DEFAULT_FALLBACK_MAX_FD
}

/// Descriptors the detached process's standard streams are redirected to.
///
/// `None` means the null device.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioTargets<'fd> {
    /// Target for standard output.
    pub stdout: Option<BorrowedFd<'fd>>,
    /// Target for standard error.
    pub stderr: Option<BorrowedFd<'fd>>,
    /// Target for standard input.
    pub stdin: Option<BorrowedFd<'fd>>,
}

impl StdioTargets<'_> {
    /// Raw descriptors of the provided targets.
    pub fn raw_fds(&self) -> impl Iterator<Item = RawFd> + '_ {
        [self.stdout, self.stderr, self.stdin]
            .into_iter()
            .flatten()
            .map(|fd| fd.as_raw_fd())
    }
}

/// Serializable part of a detachment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachOptions {
    /// Close every inherited descriptor in the daemon, except exclusions.
    #[serde(default)]
    pub close_fds: bool,

    /// Descriptors that survive `close_fds`.
    #[serde(default)]
    pub exclude_fds: Vec<RawFd>,

    /// Terminate the original process when the scope ends.
    #[serde(default)]
    pub daemonize: bool,

    /// Exclusive ceiling for closing when the descriptor limit is unbounded.
    #[serde(default = "default_fallback_max_fd")]
    pub fallback_max_fd: RawFd,

    /// Exclusive ceiling for closing that overrides the `RLIMIT_NOFILE` query.
    #[serde(default)]
    pub max_fd: Option<RawFd>,
}

impl Default for DetachOptions {
    fn default() -> Self {
        Self {
            close_fds: false,
            exclude_fds: Vec::new(),
            daemonize: false,
            fallback_max_fd: DEFAULT_FALLBACK_MAX_FD,
            max_fd: None,
        }
    }
}

impl DetachOptions {
    /// Validates the options.
    ///
    /// # Errors
    /// Returns an error for negative exclusions or non-positive ceilings.
    pub fn validate(&self) -> Result<()> {
        if let Some(fd) = self.exclude_fds.iter().find(|fd| **fd < 0) {
            return Err(DetachError::invalid_config(format!(
                "exclude_fds contains negative descriptor {fd}"
            )));
        }
        if self.fallback_max_fd <= 0 {
            return Err(DetachError::invalid_config(
                "fallback_max_fd must be positive",
            ));
        }
        if matches!(self.max_fd, Some(max) if max <= 0) {
            return Err(DetachError::invalid_config("max_fd must be positive"));
        }
        Ok(())
    }

    /// Parses options from a TOML document.
    ///
    /// # Errors
    /// Returns an error if the document cannot be parsed or fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let options: Self = toml::from_str(content)
            .map_err(|e| DetachError::invalid_config(format!("failed to parse options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    /// Loads options from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| DetachError::invalid_config(format!("failed to read options: {e}")))?;
        Self::from_toml(&content)
    }
}

/// A complete detachment request.
#[derive(Debug, Clone, Default)]
pub struct DetachConfig<'fd> {
    options: DetachOptions,
    stdio: StdioTargets<'fd>,
}

impl<'fd> DetachConfig<'fd> {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> DetachConfigBuilder<'fd> {
        DetachConfigBuilder::new()
    }

    /// Request with the given options and default (null device) streams.
    #[must_use]
    pub fn from_options(options: DetachOptions) -> Self {
        Self {
            options,
            stdio: StdioTargets::default(),
        }
    }

    /// The serializable options.
    #[must_use]
    pub const fn options(&self) -> &DetachOptions {
        &self.options
    }

    /// The stream targets.
    #[must_use]
    pub const fn stdio(&self) -> &StdioTargets<'fd> {
        &self.stdio
    }

    /// Descriptors that survive `close_fds`: caller exclusions plus every
    /// provided stream target.
    #[must_use]
    pub fn excluded_fds(&self) -> BTreeSet<RawFd> {
        self.options
            .exclude_fds
            .iter()
            .copied()
            .chain(self.stdio.raw_fds())
            .collect()
    }
}

/// Builder for [`DetachConfig`].
#[derive(Debug, Clone, Default)]
pub struct DetachConfigBuilder<'fd> {
    config: DetachConfig<'fd>,
}

impl<'fd> DetachConfigBuilder<'fd> {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the serializable options wholesale.
    #[must_use]
    pub fn options(mut self, options: DetachOptions) -> Self {
        self.config.options = options;
        self
    }

    /// Redirect standard output to `target`.
    #[must_use]
    pub fn stdout<F: AsFd + ?Sized>(mut self, target: &'fd F) -> Self {
        self.config.stdio.stdout = Some(target.as_fd());
        self
    }

    /// Redirect standard error to `target`.
    #[must_use]
    pub fn stderr<F: AsFd + ?Sized>(mut self, target: &'fd F) -> Self {
        self.config.stdio.stderr = Some(target.as_fd());
        self
    }

    /// Redirect standard input from `target`.
    #[must_use]
    pub fn stdin<F: AsFd + ?Sized>(mut self, target: &'fd F) -> Self {
        self.config.stdio.stdin = Some(target.as_fd());
        self
    }

    /// Close inherited descriptors in the daemon.
    ///
    /// Default: `false`
    #[must_use]
    pub fn close_fds(mut self, value: bool) -> Self {
        self.config.options.close_fds = value;
        self
    }

    /// Keep `handle`'s descriptor open even with `close_fds`.
    #[must_use]
    pub fn exclude<F: AsFd + ?Sized>(mut self, handle: &'fd F) -> Self {
        self.config
            .options
            .exclude_fds
            .push(handle.as_fd().as_raw_fd());
        self
    }

    /// Keep a raw descriptor open even with `close_fds`.
    #[must_use]
    pub fn exclude_raw(mut self, fd: RawFd) -> Self {
        self.config.options.exclude_fds.push(fd);
        self
    }

    /// Terminate the original process when the scope ends.
    ///
    /// Default: `false`
    #[must_use]
    pub fn daemonize(mut self, value: bool) -> Self {
        self.config.options.daemonize = value;
        self
    }

    /// Ceiling used when the descriptor limit is unbounded.
    ///
    /// Default: [`DEFAULT_FALLBACK_MAX_FD`]
    #[must_use]
    pub fn fallback_max_fd(mut self, value: RawFd) -> Self {
        self.config.options.fallback_max_fd = value;
        self
    }

    /// Close descriptors below `value` only, without querying the limit.
    #[must_use]
    pub fn max_fd(mut self, value: RawFd) -> Self {
        self.config.options.max_fd = Some(value);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> DetachConfig<'fd> {
        self.config
    }
}
