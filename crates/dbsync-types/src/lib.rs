//! # dbsync-types
//!
//! Shared domain types for keeping a full-text index in sync with a
//! relational database through trigger-maintained update-log tables.
//!
//! This crate defines the data that flows between the other crates:
//! - Column values: raw values read from update-log rows
//! - Entity ids: original entity ids recovered from those values
//! - Change events: the unit delivered from the update source to consumers
//! - Settings: layered configuration

pub mod config;
pub mod error;
pub mod event;
pub mod value;

pub use config::{Settings, SqlDialectKind, TriggerCreationStrategy};
pub use error::SyncTypesError;
pub use event::{ChangeEvent, EventType, Hints};
pub use value::{ColumnValue, EntityId, Row};
