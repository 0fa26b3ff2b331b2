//! Detach: double-fork daemonization for Unix processes.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use detach::prelude::*;
//!
//! let config = DetachConfig::builder().close_fds(true).build();
//! detach(&config, |scope| {
//!     if scope.is_daemon() {
//!         // long-running work goes here
//!     }
//!     Ok::<_, DetachError>(())
//! })?;
//! # Ok::<(), DetachError>(())
//! ```

pub use detach_core as core;
pub use detach_core::{fd, redirect};

/// Prelude module for common imports.
pub mod prelude {
    pub use detach_core::{
        CommandSpec, Detach, DetachConfig, DetachError, DetachOptions, ExitAction, Role,
        SpawnConfig, StdStream, detach, spawn, terminate,
    };
}
