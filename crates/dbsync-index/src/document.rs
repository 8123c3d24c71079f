//! Documents handed to index engines.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use dbsync_types::EntityId;

use crate::error::IndexError;

/// Full content of one root document.
///
/// Engines never patch documents; every write replaces the whole document
/// stored under `(root_type, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub root_type: String,
    pub id: EntityId,
    /// Free-text fields, name to values
    #[serde(default)]
    pub fields: BTreeMap<String, Vec<String>>,
    /// Reference fields, id field name to embedded entity ids
    #[serde(default)]
    pub embedded: BTreeMap<String, Vec<EntityId>>,
}

impl IndexDocument {
    pub fn new(root_type: impl Into<String>, id: EntityId) -> Self {
        Self {
            root_type: root_type.into(),
            id,
            fields: BTreeMap::new(),
            embedded: BTreeMap::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.entry(name.into()).or_default().push(value.into());
        self
    }

    pub fn embed(mut self, id_field: impl Into<String>, id: EntityId) -> Self {
        self.embedded.entry(id_field.into()).or_default().push(id);
        self
    }

    /// All free-text values joined for full-text indexing.
    pub fn text(&self) -> String {
        self.fields
            .values()
            .flatten()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Whether `id_field` references `id`.
    pub fn references(&self, id_field: &str, id: &EntityId) -> bool {
        self.embedded
            .get(id_field)
            .is_some_and(|ids| ids.iter().any(|candidate| candidate == id))
    }

    /// Reference terms of the form `field=value`.
    pub fn reference_terms(&self) -> Result<Vec<String>, IndexError> {
        self.embedded
            .iter()
            .flat_map(|(field, ids)| ids.iter().map(move |id| reference_term(field, id)))
            .collect()
    }

    pub fn key(&self) -> Result<String, IndexError> {
        document_key(&self.root_type, &self.id)
    }
}

/// Unique key of a root document. The id is JSON encoded so that `1` and
/// `"1"` stay distinct.
pub fn document_key(root_type: &str, id: &EntityId) -> Result<String, IndexError> {
    Ok(format!("{}#{}", root_type, serde_json::to_string(id)?))
}

/// Indexed term for a field-equals lookup. The id is JSON encoded like the
/// document key, so a composite id never matches a text id spelling it out.
pub fn reference_term(id_field: &str, id: &EntityId) -> Result<String, IndexError> {
    Ok(format!("{}={}", id_field, serde_json::to_string(id)?))
}

/// Field-equals condition of a lookup query. The value is expected in the
/// canonical form of the field's comparison type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCondition {
    pub field: String,
    pub value: EntityId,
}

impl FieldCondition {
    pub fn new(field: impl Into<String>, value: EntityId) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }

    pub fn term(&self) -> Result<String, IndexError> {
        reference_term(&self.field, &self.value)
    }
}
