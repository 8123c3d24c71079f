//! # dbsync-model
//!
//! Event model for trigger-maintained update-log tables.
//!
//! Each log table is described by an [`EventModelInfo`]: which original
//! table it shadows, which columns hold the log id and the event type, and
//! one [`IdInfo`] per original entity recoverable from a row. Metadata is
//! built either in code through [`EventModelInfo::builder`] or from a
//! [`ModelDeclaration`] file through [`parse_declarations`]. Both paths
//! apply the same validation and fail before any SQL is generated.

pub mod bridge;
pub mod declaration;
pub mod error;
pub mod info;
pub mod parser;

pub use bridge::{BridgeRegistry, IdBridge};
pub use declaration::{
    IdForMarker, LogTableDeclaration, MemberDeclaration, MemberKind, ModelDeclaration,
};
pub use error::ModelError;
pub use info::{
    validate_naming, ColumnType, EventModelInfo, EventModelInfoBuilder, IdInfo, UpdateColumn,
    DEFAULT_EVENT_TYPE_COLUMN, DEFAULT_UPDATE_ID_COLUMN,
};
pub use parser::parse_declarations;
