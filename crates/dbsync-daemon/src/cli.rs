//! CLI argument parsing for the dbsync tool.
//!
//! CLI flags override all other config sources.

use clap::{Parser, Subcommand};

/// dbsync
///
/// Trigger-based change capture from a relational database into a
/// full-text index.
#[derive(Parser, Debug)]
#[command(name = "dbsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/dbsync/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse and validate an event model file
    Validate {
        /// Model file (TOML or JSON); defaults to model_path from config
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Print the SQL that creates or drops update-log tables and triggers
    Sql {
        #[command(subcommand)]
        command: SqlCommands,
    },

    /// Print the effective settings as TOML
    Settings,
}

/// SQL subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum SqlCommands {
    /// Statements creating the update-log infrastructure
    Setup {
        #[arg(short, long)]
        model: Option<String>,

        /// SQL dialect (mysql, postgres); defaults to config
        #[arg(short, long)]
        dialect: Option<String>,
    },

    /// Statements dropping the update-log infrastructure
    Teardown {
        #[arg(short, long)]
        model: Option<String>,

        #[arg(short, long)]
        dialect: Option<String>,
    },
}
