//! Fork, reap and terminate primitives shared by the controller and spawn.

use std::fmt;

use nix::errno::Errno;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};

use crate::error::{DetachError, Result};
use crate::role::Role;

/// Fork the current process.
///
/// # Safety
/// This wrapper is safe because it performs the raw `fork(2)` and returns
/// immediately. Children created here only run the detachment protocol and
/// then either exit with [`terminate`] or hand control to caller code that
/// chose to run as a daemon.
pub(crate) fn fork_process() -> Result<ForkResult> {
    // SAFETY: see the `Safety` section above.
    unsafe { fork() }.map_err(DetachError::Fork)
}

/// Block until `child` exits. Retries on `EINTR`.
pub(crate) fn reap(child: Pid) -> Result<WaitStatus> {
    loop {
        match waitpid(child, None) {
            Ok(status) => return Ok(status),
            Err(Errno::EINTR) => {}
            Err(source) => {
                return Err(DetachError::Wait {
                    pid: child.as_raw(),
                    source,
                });
            }
        }
    }
}

/// End the current process immediately with `status`.
///
/// Uses `_exit(2)`: no destructors, no `atexit` handlers and no flushing of
/// user-space buffers. The process image is a copy of the caller's, and its
/// cleanup belongs to the original process only. Rust's stdout is
/// line-buffered, so only an unterminated last line can be lost.
pub fn terminate(status: i32) -> ! {
    // SAFETY: `_exit` is async-signal-safe and does not return.
    unsafe { libc::_exit(status) }
}

/// Report a failure that has no caller to return to.
///
/// The message goes straight to descriptor 2 with `write(2)`, bypassing both
/// the `std::io::stderr` lock, which another thread may have held at fork
/// time, and any test-harness output capture. Only the calling process also
/// logs through `tracing`: a subscriber may write through the std stream
/// locks, which a forked copy must not take.
pub(crate) fn report_failure(role: Role, context: &str, error: &dyn fmt::Display) {
    write_stderr(&format!("detach[{}]: {context}: {error}\n", std::process::id()));
    if role.is_caller() {
        tracing::error!(pid = std::process::id(), %role, "{context}: {error}");
    }
}

fn write_stderr(message: &str) {
    let mut bytes = message.as_bytes();
    while !bytes.is_empty() {
        // SAFETY: the pointer and length describe a live slice. A closed
        // descriptor 2 yields EBADF, which ends the loop.
        let written =
            unsafe { libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len()) };
        if written > 0 {
            bytes = &bytes[written as usize..];
        } else if written < 0 && Errno::last() == Errno::EINTR {
            continue;
        } else {
            break;
        }
    }
}
