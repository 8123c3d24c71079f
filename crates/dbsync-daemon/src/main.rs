//! dbsync
//!
//! Tooling for trigger-based change capture.
//!
//! # Usage
//!
//! ```bash
//! dbsync validate --model model.toml
//! dbsync sql setup --model model.toml [--dialect postgres]
//! dbsync sql teardown --model model.toml
//! dbsync settings
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/dbsync/config.toml)
//! 3. Environment variables (DBSYNC_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use dbsync_daemon::{run, Cli};

fn main() -> Result<()> {
    run(Cli::parse())
}
