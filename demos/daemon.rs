// Demos are allowed to use expect/unwrap for simplicity
#![allow(clippy::expect_used, clippy::unwrap_used)]

//! Detached Worker Demo
//!
//! Detaches a small worker that appends a heartbeat to a log file, while the
//! original process reports the worker's PID and returns to the shell.
//!
//! # Usage
//!
//! ```bash
//! # Detach with defaults, logging to /tmp/detach-demo.log
//! cargo run --example daemon
//!
//! # Read options from a TOML file
//! cargo run --example daemon -- --config detach.toml
//!
//! # Exit the launching process too once the worker is running
//! cargo run --example daemon -- --daemonize
//! ```
//!
//! An options file looks like:
//!
//! ```toml
//! close_fds = true
//! exclude_fds = []
//! daemonize = false
//! ```

use std::fs::OpenOptions;
use std::io::Write;
use std::time::Duration;

use detach::prelude::*;

const LOG_PATH: &str = "/tmp/detach-demo.log";
const HEARTBEATS: u32 = 5;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("Usage: daemon [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --config <PATH>  Load detach options from a TOML file");
        println!("  --daemonize      Exit the launching process after detaching");
        println!("  --help           Show this help");
        return Ok(());
    }

    let mut options = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args.get(i + 1).expect("--config needs a path");
            DetachOptions::load(path)?
        }
        None => DetachOptions {
            close_fds: true,
            ..DetachOptions::default()
        },
    };
    if args.iter().any(|a| a == "--daemonize") {
        options.daemonize = true;
    }

    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(LOG_PATH)?;
    let config = DetachConfig::builder()
        .options(options)
        .stdout(&log)
        .stderr(&log)
        .build();

    detach(&config, |scope| {
        match scope.pid() {
            Some(pid) => {
                tracing::info!(pid, log = LOG_PATH, "worker detached");
                if scope.daemonize() {
                    println!("{pid}");
                }
            }
            None => {
                let mut out = &log;
                for beat in 1..=HEARTBEATS {
                    writeln!(out, "[{}] heartbeat {beat}", std::process::id())?;
                    std::thread::sleep(Duration::from_secs(1));
                }
                writeln!(out, "[{}] done", std::process::id())?;
            }
        }
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;

    tracing::info!("launcher returning to the shell");
    Ok(())
}
