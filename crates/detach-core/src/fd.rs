//! Descriptor enumeration and closing for the daemon process.

use std::collections::BTreeSet;
use std::os::fd::RawFd;

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use nix::sys::resource::{Resource, getrlimit};

use crate::config::DetachOptions;
use crate::error::{DetachError, Result};

/// Exclusive upper bound for descriptor closing.
///
/// An explicit `max_fd` wins. Otherwise the hard `RLIMIT_NOFILE` is used, or
/// `fallback_max_fd` when the limit is unbounded.
pub fn max_fd(options: &DetachOptions) -> Result<RawFd> {
    if let Some(max) = options.max_fd {
        return Ok(max);
    }
    let (_soft, hard) = getrlimit(Resource::RLIMIT_NOFILE).map_err(DetachError::FdLimit)?;
    Ok(ceiling_from_limit(hard, options.fallback_max_fd))
}

fn ceiling_from_limit(hard: libc::rlim_t, fallback: RawFd) -> RawFd {
    if hard == libc::RLIM_INFINITY {
        fallback
    } else {
        RawFd::try_from(hard).unwrap_or(RawFd::MAX)
    }
}

/// Descriptors below `max` in descending order, skipping `exclude`.
pub fn fds_to_close(max: RawFd, exclude: &BTreeSet<RawFd>) -> impl Iterator<Item = RawFd> + '_ {
    (0..max.max(0)).rev().filter(move |fd| !exclude.contains(fd))
}

/// Close `fd`. A descriptor that was not open is not an error.
pub fn close_fd(fd: RawFd) -> Result<()> {
    match nix::unistd::close(fd) {
        Ok(()) | Err(Errno::EBADF) => Ok(()),
        Err(source) => Err(DetachError::CloseFd { fd, source }),
    }
}

/// Close every descriptor below `max` that is not in `exclude`.
///
/// Stops at the first failure other than `EBADF`.
pub fn close_open_fds(max: RawFd, exclude: &BTreeSet<RawFd>) -> Result<()> {
    for fd in fds_to_close(max, exclude) {
        close_fd(fd)?;
    }
    Ok(())
}

/// Clear `FD_CLOEXEC` on `fd` so it survives `exec`. A descriptor that was
/// not open is not an error.
pub fn inherit_fd(fd: RawFd) -> Result<()> {
    match fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty())) {
        Ok(_) | Err(Errno::EBADF) => Ok(()),
        Err(source) => Err(DetachError::InheritFd { fd, source }),
    }
}
