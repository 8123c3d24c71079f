//! Change events delivered by the update source.
//!
//! One update-log row yields one [`ChangeEvent`] per id-info declared on
//! its log table. Events are handed to consumers and never persisted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SyncTypesError;
use crate::value::EntityId;

/// Opaque key/value metadata passed through to consumers unchanged.
pub type Hints = BTreeMap<String, String>;

/// Kind of write that fired the trigger.
///
/// The numeric codes are what triggers store in the event-type column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

impl EventType {
    pub const ALL: [EventType; 3] = [EventType::Insert, EventType::Update, EventType::Delete];

    /// Code written into the log table's event-type column.
    pub fn code(&self) -> i64 {
        match self {
            EventType::Insert => 0,
            EventType::Update => 1,
            EventType::Delete => 2,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, SyncTypesError> {
        match code {
            0 => Ok(EventType::Insert),
            1 => Ok(EventType::Update),
            2 => Ok(EventType::Delete),
            other => Err(SyncTypesError::UnknownEventType(other)),
        }
    }

    /// SQL keyword used in trigger definitions.
    pub fn sql_keyword(&self) -> &'static str {
        match self {
            EventType::Insert => "INSERT",
            EventType::Update => "UPDATE",
            EventType::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Insert => write!(f, "insert"),
            EventType::Update => write!(f, "update"),
            EventType::Delete => write!(f, "delete"),
        }
    }
}

/// A change to one original entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Logical entity type the id belongs to
    pub entity_class: String,

    /// Id already converted to the original entity's id type
    pub id: EntityId,

    pub event_type: EventType,

    #[serde(default)]
    pub hints: Hints,
}

impl ChangeEvent {
    pub fn new(entity_class: impl Into<String>, id: EntityId, event_type: EventType) -> Self {
        Self {
            entity_class: entity_class.into(),
            id,
            event_type,
            hints: Hints::new(),
        }
    }

    pub fn with_hints(mut self, hints: Hints) -> Self {
        self.hints = hints;
        self
    }
}
