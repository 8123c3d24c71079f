//! Declarative description of update-log tables.
//!
//! A declaration lists the members of a log-row type and the markers placed
//! on them. It is plain data: build it in code, or load it from a TOML or
//! JSON file. [`crate::parser::parse_declarations`] turns it into validated
//! [`crate::EventModelInfo`]s.
//!
//! ```toml
//! [[log_table]]
//! update_table = "place_updates"
//! original_table = "place"
//!
//! [[log_table.members]]
//! name = "event_type"
//! event = true
//!
//! [[log_table.members]]
//! name = "place_id"
//! id_for = { entity_class = "Place", columns_in_original = ["id"] }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use dbsync_types::Hints;

use crate::error::ModelError;
use crate::info::ColumnType;

fn default_bridge() -> String {
    "integer".to_string()
}

/// Structural level a marker is declared on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    #[default]
    Field,
    Accessor,
}

/// Marks a member as carrying (part of) an original entity id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdForMarker {
    pub entity_class: String,

    /// Log-table columns; defaults to the member's own column.
    #[serde(default)]
    pub columns_in_update_table: Vec<String>,

    /// Columns of the original table; defaults to the log-table columns.
    #[serde(default)]
    pub columns_in_original: Vec<String>,

    #[serde(default)]
    pub column_types: Vec<ColumnType>,

    /// Name of a registered id bridge
    #[serde(default = "default_bridge")]
    pub bridge: String,

    #[serde(default)]
    pub hints: Hints,
}

impl IdForMarker {
    pub fn new(entity_class: impl Into<String>) -> Self {
        Self {
            entity_class: entity_class.into(),
            columns_in_update_table: Vec::new(),
            columns_in_original: Vec::new(),
            column_types: Vec::new(),
            bridge: default_bridge(),
            hints: Hints::new(),
        }
    }

    pub fn columns(mut self, update_table: &[&str], original: &[&str]) -> Self {
        self.columns_in_update_table = update_table.iter().map(|s| s.to_string()).collect();
        self.columns_in_original = original.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn bridge(mut self, bridge: impl Into<String>) -> Self {
        self.bridge = bridge.into();
        self
    }

    pub fn hint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.hints.insert(key.into(), value.into());
        self
    }
}

/// One member of a log-row type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberDeclaration {
    pub name: String,

    #[serde(default)]
    pub kind: MemberKind,

    /// Column backing the member; defaults to `name`.
    #[serde(default)]
    pub column: Option<String>,

    /// Event type marker
    #[serde(default)]
    pub event: bool,

    /// Log id marker; without one the table uses `update_id`.
    #[serde(default)]
    pub update_id: bool,

    #[serde(default)]
    pub id_for: Option<IdForMarker>,
}

impl MemberDeclaration {
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MemberKind::Field,
            column: None,
            event: false,
            update_id: false,
            id_for: None,
        }
    }

    pub fn accessor(name: impl Into<String>) -> Self {
        Self {
            kind: MemberKind::Accessor,
            ..Self::field(name)
        }
    }

    pub fn event(mut self) -> Self {
        self.event = true;
        self
    }

    pub fn update_id(mut self) -> Self {
        self.update_id = true;
        self
    }

    pub fn id_for(mut self, marker: IdForMarker) -> Self {
        self.id_for = Some(marker);
        self
    }

    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }

    pub fn has_marker(&self) -> bool {
        self.event || self.update_id || self.id_for.is_some()
    }
}

/// One log-row type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogTableDeclaration {
    pub update_table: String,
    pub original_table: String,
    #[serde(default)]
    pub members: Vec<MemberDeclaration>,
}

impl LogTableDeclaration {
    pub fn new(update_table: impl Into<String>, original_table: impl Into<String>) -> Self {
        Self {
            update_table: update_table.into(),
            original_table: original_table.into(),
            members: Vec::new(),
        }
    }

    pub fn member(mut self, member: MemberDeclaration) -> Self {
        self.members.push(member);
        self
    }
}

/// Root of a model file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDeclaration {
    #[serde(default, rename = "log_table")]
    pub log_tables: Vec<LogTableDeclaration>,
}

impl ModelDeclaration {
    pub fn from_toml_str(s: &str) -> Result<Self, ModelError> {
        toml::from_str(s).map_err(|e| ModelError::Declaration(e.to_string()))
    }

    pub fn from_json_str(s: &str) -> Result<Self, ModelError> {
        serde_json::from_str(s).map_err(|e| ModelError::Declaration(e.to_string()))
    }

    /// Load a model file, choosing the format by extension (`.json` or TOML).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"
[[log_table]]
update_table = "place_updates"
original_table = "place"

[[log_table.members]]
name = "event_type"
event = true

[[log_table.members]]
name = "place_id"
id_for = { entity_class = "Place", columns_in_original = ["id"], hints = { boost = "2" } }
"#;

    #[test]
    fn test_from_toml() {
        let model = ModelDeclaration::from_toml_str(MODEL).unwrap();
        assert_eq!(model.log_tables.len(), 1);
        let table = &model.log_tables[0];
        assert_eq!(table.update_table, "place_updates");
        assert_eq!(table.members.len(), 2);
        assert!(table.members[0].event);
        let marker = table.members[1].id_for.as_ref().unwrap();
        assert_eq!(marker.bridge, "integer");
        assert_eq!(marker.columns_in_original, vec!["id".to_string()]);
        assert_eq!(marker.hints.get("boost").map(String::as_str), Some("2"));
        assert_eq!(table.members[1].kind, MemberKind::Field);
    }

    #[test]
    fn test_from_json() {
        let json = r#"{"log_table":[{"update_table":"u","original_table":"o",
            "members":[{"name":"getType","kind":"accessor","column":"event_type","event":true}]}]}"#;
        let model = ModelDeclaration::from_json_str(json).unwrap();
        let member = &model.log_tables[0].members[0];
        assert_eq!(member.kind, MemberKind::Accessor);
        assert_eq!(member.column_name(), "event_type");
    }

    #[test]
    fn test_invalid_toml() {
        let err = ModelDeclaration::from_toml_str("[[log_table]]\nupdate_table = 3").unwrap_err();
        assert!(matches!(err, ModelError::Declaration(_)));
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("model.toml");
        std::fs::write(&path, MODEL).unwrap();
        let model = ModelDeclaration::load(&path).unwrap();
        assert_eq!(model.log_tables[0].original_table, "place");

        let missing = ModelDeclaration::load(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ModelError::Io(_))));
    }
}
