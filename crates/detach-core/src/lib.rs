// Iron Lotus: Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # detach-core
//!
//! Fork and detach the current process with the classic double fork.
//!
//! ## The Protocol
//!
//! 1. The original process forks and waits for its child.
//! 2. The child calls `setsid()` to leave the controlling terminal, forks
//!    again, writes the grandchild's PID into a shared page and exits.
//! 3. The grandchild is the daemon: it is not a session leader, so it can
//!    never reacquire a terminal. It optionally closes inherited descriptors
//!    and points its standard streams at the requested targets.
//! 4. The original reads the daemon's PID after reaping the child.
//!
//! Only the daemon sees no PID, which is how the scope body tells the two
//! surviving processes apart.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use detach_core::{DetachConfig, detach};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let log = std::fs::File::create("/tmp/worker.log")?;
//!     let config = DetachConfig::builder()
//!         .stdout(&log)
//!         .stderr(&log)
//!         .close_fds(true)
//!         .build();
//!
//!     detach(&config, |scope| {
//!         match scope.pid() {
//!             Some(pid) => println!("daemon started as {pid}"),
//!             None => println!("running detached"),
//!         }
//!         Ok(())
//!     })
//! }
//! ```
//!
//! ## Detached Commands
//!
//! ```rust,no_run
//! use detach_core::{CommandSpec, SpawnConfig, spawn};
//!
//! let pid = spawn(SpawnConfig::new(CommandSpec::shell("exec sleep 60")))?;
//! println!("sleep running as {pid}");
//! # Ok::<(), detach_core::DetachError>(())
//! ```
//!
//! ## Platform Support
//!
//! Unix only. Every operation is a POSIX process primitive.

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, rust_2018_idioms)]

#[cfg(not(unix))]
compile_error!("detach-core requires a Unix platform");

mod config;
mod controller;
mod error;
pub mod fd;
mod process;
pub mod redirect;
mod role;
mod shared;
mod spawn;

pub use config::{
    DEFAULT_FALLBACK_MAX_FD, DetachConfig, DetachConfigBuilder, DetachOptions, StdioTargets,
};
pub use controller::{Detach, detach};
pub use error::{DetachError, Result};
pub use process::terminate;
pub use redirect::StdStream;
pub use role::{ExitAction, Role};
pub use spawn::{CommandSpec, SHELL, SpawnConfig, spawn};
