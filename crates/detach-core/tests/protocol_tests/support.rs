//! Helpers for passing observations from detached processes back to the test.

use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// How long the original waits for a detached process to report.
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period before asserting that something did NOT happen.
pub const SETTLE: Duration = Duration::from_millis(300);

/// Write `line` to `path` atomically, so a poller never sees half of it.
pub fn report(path: &Path, line: &str) -> io::Result<()> {
    let staging = path.with_extension("partial");
    fs::write(&staging, format!("{line}\n"))?;
    fs::rename(&staging, path)
}

/// Poll `path` until it holds at least one complete line.
pub fn wait_for_line(path: &Path) -> String {
    wait_until(path, |contents| contents.ends_with('\n'))
}

/// Poll `path` until its contents contain `needle`.
pub fn wait_for_text(path: &Path, needle: &str) -> String {
    wait_until(path, |contents| contents.contains(needle))
}

fn wait_until(path: &Path, done: impl Fn(&str) -> bool) -> String {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        if let Ok(contents) = fs::read_to_string(path) {
            if done(&contents) {
                return contents;
            }
        }
        if Instant::now() >= deadline {
            let seen = fs::read_to_string(path).unwrap_or_default();
            panic!("timed out waiting on {}: saw {seen:?}", path.display());
        }
        thread::sleep(Duration::from_millis(20));
    }
}

/// Block until `path` exists, giving up after [`TIMEOUT`].
pub fn wait_for_file(path: &Path) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if path.exists() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

/// Parse whitespace-separated integers from a report line.
pub fn numbers(line: &str) -> Vec<i64> {
    line.split_whitespace()
        .map(|word| word.parse().unwrap())
        .collect()
}
