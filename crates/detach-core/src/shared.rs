//! Write-once PID cell shared across `fork(2)`.
//!
//! The intermediate child is the only process that learns the daemon's PID,
//! but it is the original process that needs it. The cell is an anonymous
//! `MAP_SHARED` mapping created before the first fork, so all descendants see
//! the same page. The intermediate child stores once and exits; the original
//! loads once after reaping it. `waitpid` orders the two accesses, so the
//! cell carries no lock.

use std::io;
use std::ptr::NonNull;

use nix::unistd::Pid;

use crate::error::{DetachError, Result};

const CELL_SIZE: usize = std::mem::size_of::<libc::pid_t>();

/// A single `pid_t` in memory shared with forked children.
#[derive(Debug)]
pub(crate) struct SharedPid {
    ptr: NonNull<libc::pid_t>,
}

impl SharedPid {
    /// Map a zeroed cell.
    pub(crate) fn new() -> Result<Self> {
        // SAFETY: anonymous mapping with no address hint; the kernel picks the
        // placement and zero-fills the page.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                CELL_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if addr == libc::MAP_FAILED {
            return Err(DetachError::SharedMemory(io::Error::last_os_error()));
        }

        let ptr = NonNull::new(addr.cast::<libc::pid_t>()).ok_or_else(|| {
            DetachError::SharedMemory(io::Error::other("mmap returned a null mapping"))
        })?;

        Ok(Self { ptr })
    }

    /// Record the daemon's PID. Called once, by the intermediate child.
    pub(crate) fn store(&self, pid: Pid) {
        // SAFETY: `ptr` is a live, aligned mapping of at least `CELL_SIZE`
        // bytes for the lifetime of `self`.
        unsafe { self.ptr.as_ptr().write_volatile(pid.as_raw()) }
    }

    /// Read the recorded PID. `None` if nothing was stored.
    pub(crate) fn load(&self) -> Option<Pid> {
        // SAFETY: see `store`.
        let raw = unsafe { self.ptr.as_ptr().read_volatile() };
        (raw > 0).then(|| Pid::from_raw(raw))
    }
}

impl Drop for SharedPid {
    fn drop(&mut self) {
        // SAFETY: the mapping was created by `new` with the same length and
        // is not referenced after drop.
        let _ = unsafe { libc::munmap(self.ptr.as_ptr().cast(), CELL_SIZE) };
    }
}
