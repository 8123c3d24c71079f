//! # dbsync-triggers
//!
//! Generates the SQL that makes a database record its own changes: the
//! shared unique-id generator, one update-log table per
//! [`dbsync_model::EventModelInfo`], and INSERT/UPDATE/DELETE triggers on the
//! original tables. [`TriggerSetup`] runs the generated statements against a
//! [`dbsync_storage::Database`] according to a
//! [`dbsync_types::TriggerCreationStrategy`].

pub mod dialect;
pub mod error;
pub mod mysql;
pub mod postgres;
pub mod setup;

pub use dialect::{dialect_for, TriggerSqlDialect, DEFAULT_TABLE_PREFIX};
pub use error::TriggerError;
pub use mysql::MySqlTriggerDialect;
pub use postgres::PostgresTriggerDialect;
pub use setup::{SetupReport, TriggerSetup};
