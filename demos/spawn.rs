// Demos are allowed to use expect/unwrap for simplicity
#![allow(clippy::expect_used, clippy::unwrap_used)]

//! Detached Command Demo
//!
//! Launches a command fully detached from the current session and prints
//! its PID.
//!
//! # Usage
//!
//! ```bash
//! # Run a shell command line
//! cargo run --example spawn -- 'sleep 30; echo finished'
//!
//! # Write the command's output to a file
//! cargo run --example spawn -- --output /tmp/spawned.log 'date; uname -a'
//! ```

use std::fs::File;

use detach::prelude::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let mut args = std::env::args().skip(1).peekable();
    let output = if args.peek().is_some_and(|a| a == "--output") {
        let path = args.nth(1).expect("--output needs a path");
        Some(File::create(path)?)
    } else {
        None
    };
    let line = args.collect::<Vec<_>>().join(" ");
    if line.is_empty() {
        eprintln!("Usage: spawn [--output <PATH>] <COMMAND LINE>");
        std::process::exit(2);
    }

    let mut config = SpawnConfig::new(CommandSpec::shell(line));
    if let Some(file) = output.as_ref() {
        config = config.stdout(file).stderr(file);
    }

    let pid = spawn(config)?;
    println!("{pid}");
    Ok(())
}
