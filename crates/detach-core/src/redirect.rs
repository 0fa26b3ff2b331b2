//! Standard stream redirection for detached processes.

use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, IntoRawFd, RawFd};

use crate::config::StdioTargets;
use crate::error::{DetachError, Result};

/// Path of the null device used for streams without a target.
pub const NULL_DEVICE: &str = "/dev/null";

/// One of the three standard streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdStream {
    /// Standard output (fd 1).
    Stdout,
    /// Standard error (fd 2).
    Stderr,
    /// Standard input (fd 0).
    Stdin,
}

impl StdStream {
    /// The descriptor number of this stream.
    #[must_use]
    pub const fn fd(self) -> RawFd {
        match self {
            Self::Stdin => libc::STDIN_FILENO,
            Self::Stdout => libc::STDOUT_FILENO,
            Self::Stderr => libc::STDERR_FILENO,
        }
    }
}

impl fmt::Display for StdStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
            Self::Stdin => write!(f, "stdin"),
        }
    }
}

/// Point `stream` at `target`, or at the null device when `target` is `None`.
pub fn redirect(stream: StdStream, target: Option<BorrowedFd<'_>>) -> Result<()> {
    redirect_onto(target, stream.fd()).map_err(|source| DetachError::Redirect { stream, source })
}

/// Redirect stdout, stderr and stdin, in that order.
///
/// Must run after descriptor closing, or the duplicated slots would be
/// closed again.
pub fn redirect_stdio(targets: &StdioTargets<'_>) -> Result<()> {
    redirect(StdStream::Stdout, targets.stdout)?;
    redirect(StdStream::Stderr, targets.stderr)?;
    redirect(StdStream::Stdin, targets.stdin)?;
    Ok(())
}

pub(crate) fn redirect_onto(target: Option<BorrowedFd<'_>>, slot: RawFd) -> io::Result<()> {
    match target {
        Some(fd) => dup_onto(fd.as_raw_fd(), slot),
        None => {
            let null = OpenOptions::new().read(true).write(true).open(NULL_DEVICE)?;
            dup_onto(null.as_raw_fd(), slot)?;
            // With the standard slots closed, open(2) hands one of them back.
            // Keep it occupied; anything higher is released.
            if null.as_raw_fd() <= libc::STDERR_FILENO {
                let _ = null.into_raw_fd();
            }
            Ok(())
        }
    }
}

fn dup_onto(source: RawFd, slot: RawFd) -> io::Result<()> {
    if source == slot {
        return Ok(());
    }
    nix::unistd::dup2(source, slot)
        .map(drop)
        .map_err(io::Error::from)
}
