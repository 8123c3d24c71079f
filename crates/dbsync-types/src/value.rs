//! Raw column values and converted entity ids.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SyncTypesError;

/// A raw row as returned by the data-access layer, keyed by column name.
pub type Row = BTreeMap<String, ColumnValue>;

/// A single value read from (or written to) an update-log column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnValue {
    /// SQL NULL
    Null,
    /// Any integral column
    Int(i64),
    /// Any character column
    Text(String),
}

impl ColumnValue {
    /// Integer view of the value. Text holding a decimal integer is accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ColumnValue::Int(v) => Some(*v),
            ColumnValue::Text(s) => s.trim().parse().ok(),
            ColumnValue::Null => None,
        }
    }

    /// Text view of the value. Integers are rendered in decimal.
    pub fn as_text(&self) -> Option<String> {
        match self {
            ColumnValue::Int(v) => Some(v.to_string()),
            ColumnValue::Text(s) => Some(s.clone()),
            ColumnValue::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }
}

impl From<i64> for ColumnValue {
    fn from(v: i64) -> Self {
        ColumnValue::Int(v)
    }
}

impl From<i32> for ColumnValue {
    fn from(v: i32) -> Self {
        ColumnValue::Int(v as i64)
    }
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        ColumnValue::Text(v.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(v: String) -> Self {
        ColumnValue::Text(v)
    }
}

impl std::fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnValue::Null => write!(f, "NULL"),
            ColumnValue::Int(v) => write!(f, "{}", v),
            ColumnValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Id of an original entity, as produced by an id bridge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Int(i64),
    Text(String),
    /// Multi-column id, one part per column
    Composite(Vec<EntityId>),
}

impl EntityId {
    /// Build a single-column id from a raw column value.
    ///
    /// NULL cannot identify an entity and is rejected.
    pub fn from_column(value: &ColumnValue) -> Result<Self, SyncTypesError> {
        match value {
            ColumnValue::Int(v) => Ok(EntityId::Int(*v)),
            ColumnValue::Text(s) => Ok(EntityId::Text(s.clone())),
            ColumnValue::Null => Err(SyncTypesError::InvalidValue(
                "NULL cannot be used as an entity id".to_string(),
            )),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            EntityId::Int(v) => Some(*v),
            EntityId::Text(s) => s.trim().parse().ok(),
            EntityId::Composite(_) => None,
        }
    }
}

impl From<i64> for EntityId {
    fn from(v: i64) -> Self {
        EntityId::Int(v)
    }
}

impl From<&str> for EntityId {
    fn from(v: &str) -> Self {
        EntityId::Text(v.to_string())
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityId::Int(v) => write!(f, "{}", v),
            EntityId::Text(s) => write!(f, "{}", s),
            EntityId::Composite(parts) => {
                let rendered: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "{}", rendered.join(","))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_value_views() {
        assert_eq!(ColumnValue::Int(42).as_i64(), Some(42));
        assert_eq!(ColumnValue::Text(" 17 ".into()).as_i64(), Some(17));
        assert_eq!(ColumnValue::Text("abc".into()).as_i64(), None);
        assert_eq!(ColumnValue::Null.as_i64(), None);
        assert_eq!(ColumnValue::Int(5).as_text(), Some("5".to_string()));
        assert!(ColumnValue::Null.is_null());
    }

    #[test]
    fn test_entity_id_from_column() {
        assert_eq!(
            EntityId::from_column(&ColumnValue::Int(3)).unwrap(),
            EntityId::Int(3)
        );
        assert_eq!(
            EntityId::from_column(&ColumnValue::Text("x".into())).unwrap(),
            EntityId::Text("x".into())
        );
        assert!(EntityId::from_column(&ColumnValue::Null).is_err());
    }

    #[test]
    fn test_entity_id_display() {
        assert_eq!(EntityId::Int(9).to_string(), "9");
        assert_eq!(EntityId::Text("place-1".into()).to_string(), "place-1");
        let composite = EntityId::Composite(vec![EntityId::Int(1), EntityId::Text("a".into())]);
        assert_eq!(composite.to_string(), "1,a");
    }

    #[test]
    fn test_untagged_serialization() {
        let json = serde_json::to_string(&EntityId::Int(12)).unwrap();
        assert_eq!(json, "12");
        let json = serde_json::to_string(&ColumnValue::Text("a".into())).unwrap();
        assert_eq!(json, "\"a\"");
    }
}
