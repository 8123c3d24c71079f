//! # dbsync-source
//!
//! Drains trigger-maintained update-log tables in global log-id order and
//! delivers the decoded change events to registered consumers.
//!
//! - [`MultiQueryCursor`]: ordered merge over independently paginated tables
//! - [`UpdateSource`]: the poller, with start/pause/stop and per-tick
//!   transactions
//! - [`UpdateConsumer`]: what the poller delivers to
//! - [`PollerStatus`]: tick counters and last results

pub mod config;
pub mod consumer;
pub mod cursor;
pub mod error;
pub mod source;
pub mod status;

pub use config::SourceConfig;
pub use consumer::UpdateConsumer;
pub use cursor::{CursorQuery, MultiQueryCursor};
pub use error::{ConsumerError, SourceError};
pub use source::{PollerState, TickOutcome, TickStats, UpdateSource};
pub use status::{PollerSnapshot, PollerStatus, TickResult};
