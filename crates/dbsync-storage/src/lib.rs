//! # dbsync-storage
//!
//! Relational data-access contract used by the update source and the
//! trigger setup, plus [`MemoryDatabase`], an in-process implementation with
//! simulated update-log triggers.

pub mod database;
pub mod error;
pub mod memory;

pub use database::{Database, Transaction};
pub use error::StorageError;
pub use memory::{FailPoint, MemoryDatabase, MemoryTransaction};
