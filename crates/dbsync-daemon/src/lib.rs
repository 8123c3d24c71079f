//! dbsync command-line library exports.
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (validate, sql, settings)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, SqlCommands};
pub use commands::{
    describe_model, init_logging, load_model, load_settings, render_settings, render_sql, run,
};
