//! Detached spawning of external commands.

use std::error::Error;
use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use detach_core::{CommandSpec, DetachConfig, DetachError, SpawnConfig, detach, spawn};

use super::support::{SETTLE, numbers, report, wait_for_line, wait_for_text};

/// Close ceiling for the intermediate child, so closing stays cheap
/// regardless of `RLIMIT_NOFILE`.
const FD_CEILING: RawFd = 256;

/// A descriptor without `FD_CLOEXEC`, so `exec` alone would not close it.
#[cfg(target_os = "linux")]
fn inheritable(file: &File) -> OwnedFd {
    // SAFETY: plain dup(2) of a descriptor we own.
    let raw = unsafe { libc::dup(file.as_raw_fd()) };
    assert!(raw >= 0, "dup failed: {}", std::io::Error::last_os_error());
    // SAFETY: `dup` returned a fresh descriptor that nothing else owns.
    unsafe { OwnedFd::from_raw_fd(raw) }
}

#[test]
fn returns_pid_printed_by_command() {
    let dir = tempfile::tempdir().unwrap();
    let stdout_path = dir.path().join("stdout");
    let stdout = File::create(&stdout_path).unwrap();

    let pid = spawn(
        SpawnConfig::new(CommandSpec::argv(["sh", "-c", "echo $$"]))
            .stdout(&stdout)
            .max_fd(FD_CEILING),
    )
    .unwrap();

    assert_eq!(numbers(&wait_for_line(&stdout_path)), vec![i64::from(pid)]);
}

#[test]
fn shell_command_with_env_and_cwd() {
    let dir = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let stdout_path = dir.path().join("stdout");
    let stdout = File::create(&stdout_path).unwrap();

    spawn(
        SpawnConfig::new(CommandSpec::shell("echo \"$GREETING\"; pwd -P"))
            .stdout(&stdout)
            .env([("GREETING", "hello"), ("PATH", "/usr/bin:/bin")])
            .current_dir(work.path())
            .max_fd(FD_CEILING),
    )
    .unwrap();

    let text = wait_for_text(&stdout_path, "\n/");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "hello");
    assert_eq!(
        std::path::Path::new(lines[1]),
        work.path().canonicalize().unwrap()
    );
}

#[test]
fn argv_through_shell_flag() {
    let dir = tempfile::tempdir().unwrap();
    let stdout_path = dir.path().join("stdout");
    let stdout = File::create(&stdout_path).unwrap();

    spawn(
        SpawnConfig::new(CommandSpec::argv(["echo \"$0\"", "positional"]))
            .shell(true)
            .stdout(&stdout)
            .max_fd(FD_CEILING),
    )
    .unwrap();

    assert_eq!(wait_for_line(&stdout_path), "positional\n");
}

#[test]
fn launch_failure_surfaces_as_missing_pid() {
    let dir = tempfile::tempdir().unwrap();
    let stderr_path = dir.path().join("stderr");
    let stderr = File::create(&stderr_path).unwrap();

    let err = spawn(
        SpawnConfig::new(CommandSpec::argv(["/nonexistent/detach-test-binary"]))
            .stderr(&stderr)
            .max_fd(FD_CEILING),
    )
    .unwrap_err();
    assert!(matches!(err, DetachError::MissingPid), "{err}");

    let text = wait_for_text(&stderr_path, "failed to spawn");
    assert!(text.contains("/nonexistent/detach-test-binary"), "{text}");
}

#[cfg(target_os = "linux")]
#[test]
fn inherited_descriptors_are_closed_before_launch() {
    let dir = tempfile::tempdir().unwrap();
    let stdout_path = dir.path().join("stdout");
    let stdout = File::create(&stdout_path).unwrap();
    let secret = inheritable(&File::create(dir.path().join("secret")).unwrap());

    let script = format!(
        "if [ -e /proc/self/fd/{0} ]; then echo leaked; else echo closed; fi",
        secret.as_raw_fd()
    );
    spawn(
        SpawnConfig::new(CommandSpec::shell(script))
            .stdout(&stdout)
            .max_fd(secret.as_raw_fd() + 64),
    )
    .unwrap();

    assert_eq!(wait_for_line(&stdout_path), "closed\n");
}

#[cfg(target_os = "linux")]
#[test]
fn excluded_descriptor_reaches_command() {
    let dir = tempfile::tempdir().unwrap();
    let shared_path = dir.path().join("shared");
    let stderr_path = dir.path().join("stderr");
    let stderr = File::create(&stderr_path).unwrap();
    // Plain std handle: opened with FD_CLOEXEC.
    let shared = File::create(&shared_path).unwrap();

    let script = format!("echo passed > /proc/self/fd/{}", shared.as_raw_fd());
    spawn(
        SpawnConfig::new(CommandSpec::shell(script))
            .exclude(&shared)
            .stderr(&stderr)
            .max_fd(shared.as_raw_fd() + 64),
    )
    .unwrap();

    let got = wait_for_line(&shared_path);
    assert_eq!(
        got,
        "passed\n",
        "stderr: {}",
        std::fs::read_to_string(&stderr_path).unwrap_or_default()
    );
}

#[test]
fn pre_exec_hook_runs_in_command_process() {
    let dir = tempfile::tempdir().unwrap();
    let stdout_path = dir.path().join("stdout");
    let stdout = File::create(&stdout_path).unwrap();

    let restrict_umask = || -> std::io::Result<()> {
        // SAFETY: umask(2) is async-signal-safe and cannot fail.
        unsafe { libc::umask(0o027) };
        Ok(())
    };
    // SAFETY: the hook only calls umask(2).
    let config = unsafe {
        SpawnConfig::new(CommandSpec::shell("umask"))
            .stdout(&stdout)
            .max_fd(FD_CEILING)
            .pre_exec(restrict_umask)
    };
    spawn(config).unwrap();

    assert_eq!(wait_for_line(&stdout_path).trim(), "0027");
}

#[test]
fn nested_daemonizing_spawn_ends_the_intermediate_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let stdout_path = dir.path().join("stdout");
    let leaked = dir.path().join("leaked");
    let stdout = File::create(&stdout_path).unwrap();

    let outer = DetachConfig::builder().build();
    detach(&outer, |scope| {
        if scope.is_daemon() {
            spawn(
                SpawnConfig::new(CommandSpec::shell("echo $$"))
                    .stdout(&stdout)
                    .max_fd(FD_CEILING)
                    .daemonize(true),
            )?;
            report(&leaked, "daemonizing spawn returned")?;
        }
        Ok::<_, Box<dyn Error>>(())
    })
    .unwrap();

    assert_eq!(numbers(&wait_for_line(&stdout_path)).len(), 1);
    std::thread::sleep(SETTLE);
    assert!(!leaked.exists(), "daemon continued after a daemonizing spawn");
}

#[test]
fn daemonizing_spawn_flushes_the_callers_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let launcher_path = dir.path().join("launcher");
    let launcher_log = File::create(&launcher_path).unwrap();

    let outer = DetachConfig::builder().stdout(&launcher_log).build();
    detach(&outer, |scope| {
        if scope.is_daemon() {
            // No newline: stays in the line buffer until the process exits.
            std::io::stdout().write_all(b"launcher flushed")?;
            spawn(
                SpawnConfig::new(CommandSpec::argv(["true"]))
                    .max_fd(FD_CEILING)
                    .daemonize(true),
            )?;
        }
        Ok::<_, Box<dyn Error>>(())
    })
    .unwrap();

    wait_for_text(&launcher_path, "launcher flushed");
}
