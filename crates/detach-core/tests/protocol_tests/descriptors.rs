//! Descriptor closing and exclusion in the daemon.

use std::error::Error;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, RawFd};

use detach_core::{DetachConfig, detach};

use super::support::{numbers, wait_for_line};

type BoxError = Box<dyn Error>;

/// Close ceiling just above the test's own descriptors, so closing stays
/// cheap regardless of `RLIMIT_NOFILE`.
fn ceiling(fds: &[RawFd]) -> RawFd {
    fds.iter().copied().max().unwrap_or(2) + 64
}

/// `write(2)` one byte to a raw descriptor, returning `(rc, errno)`.
fn write_one_byte(fd: RawFd) -> (isize, i32) {
    // SAFETY: writes one byte from a static buffer; `fd` may be closed.
    let rc = unsafe { libc::write(fd, b"x".as_ptr().cast(), 1) };
    let errno = if rc < 0 {
        io::Error::last_os_error().raw_os_error().unwrap_or(0)
    } else {
        0
    };
    (rc, errno)
}

fn is_open(fd: RawFd) -> bool {
    // SAFETY: F_GETFD only inspects the descriptor table.
    unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}

#[test]
fn close_fds_closes_inherited_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    let inherited = tempfile::tempfile().unwrap();
    let inherited_fd = inherited.as_raw_fd();
    let result_path = dir.path().join("result");
    let result = File::create(&result_path).unwrap();

    let config = DetachConfig::builder()
        .close_fds(true)
        .exclude(&result)
        .max_fd(ceiling(&[inherited_fd, result.as_raw_fd()]))
        .build();

    detach(&config, |scope| {
        if scope.is_daemon() {
            let (rc, errno) = write_one_byte(inherited_fd);
            let mut out = &result;
            writeln!(out, "{rc} {errno}")?;
        }
        Ok::<_, BoxError>(())
    })
    .unwrap();

    let seen = numbers(&wait_for_line(&result_path));
    assert_eq!(seen, vec![-1, i64::from(libc::EBADF)]);

    // Only the daemon's table was touched.
    assert!(is_open(inherited_fd));
}

#[test]
fn excluded_descriptor_stays_usable() {
    let dir = tempfile::tempdir().unwrap();
    let kept_path = dir.path().join("kept");
    let kept = File::create(&kept_path).unwrap();

    let config = DetachConfig::builder()
        .close_fds(true)
        .exclude_raw(kept.as_raw_fd())
        .max_fd(ceiling(&[kept.as_raw_fd()]))
        .build();

    detach(&config, |scope| {
        if scope.is_daemon() {
            let mut out = &kept;
            writeln!(out, "{}", std::process::id())?;
        }
        Ok::<_, BoxError>(())
    })
    .unwrap();

    assert_eq!(numbers(&wait_for_line(&kept_path)).len(), 1);
}

#[test]
fn stream_targets_survive_close_fds() {
    let dir = tempfile::tempdir().unwrap();
    let stdout_path = dir.path().join("stdout");
    let stdout = File::create(&stdout_path).unwrap();

    let config = DetachConfig::builder()
        .stdout(&stdout)
        .close_fds(true)
        .max_fd(ceiling(&[stdout.as_raw_fd()]))
        .build();

    detach(&config, |scope| {
        if scope.is_daemon() {
            let slots: Vec<String> = (0..=2)
                .map(|fd| i32::from(is_open(fd)).to_string())
                .collect();
            let mut out = OpenOptions::new().append(true).open("/dev/stdout")?;
            writeln!(out, "{}", slots.join(" "))?;
        }
        Ok::<_, BoxError>(())
    })
    .unwrap();

    // stdin and stderr land on the null device, stdout on the target.
    assert_eq!(numbers(&wait_for_line(&stdout_path)), vec![1, 1, 1]);
}
