//! Index root metadata.
//!
//! An index root is an entity type that owns a document in the index. A
//! root may embed other entity types; the embedded entity's id is stored in
//! a reference field so that documents can be found again when the embedded
//! entity changes or disappears.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use dbsync_types::EntityId;

use crate::document::IndexDocument;
use crate::error::IndexError;

/// Comparison type of an id field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Ids compare as integers: `"007"` and `7` are the same id
    #[default]
    Numeric,
    /// Ids compare verbatim
    String,
}

impl FieldKind {
    /// Bring an id into the canonical form of this comparison type.
    pub fn normalize(&self, field: &str, id: &EntityId) -> Result<EntityId, IndexError> {
        match self {
            FieldKind::Numeric => {
                id.as_i64()
                    .map(EntityId::Int)
                    .ok_or_else(|| IndexError::FieldType {
                        field: field.to_string(),
                        id: id.to_string(),
                    })
            }
            FieldKind::String => match id {
                EntityId::Int(v) => Ok(EntityId::Text(v.to_string())),
                other => Ok(other.clone()),
            },
        }
    }

    /// Lookup value for a field-equals condition.
    pub fn render(&self, field: &str, id: &EntityId) -> Result<String, IndexError> {
        Ok(self.normalize(field, id)?.to_string())
    }
}

/// One embedded entity type inside a root document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedField {
    pub entity_class: String,
    /// Reference field holding the embedded entity's id
    pub id_field: String,
    pub kind: FieldKind,
}

/// Description of one index root type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRootMetadata {
    pub root_type: String,
    #[serde(default)]
    pub id_kind: FieldKind,
    #[serde(default)]
    pub embedded: Vec<EmbeddedField>,
}

impl IndexRootMetadata {
    pub fn new(root_type: impl Into<String>) -> Self {
        Self {
            root_type: root_type.into(),
            id_kind: FieldKind::Numeric,
            embedded: Vec::new(),
        }
    }

    pub fn with_id_kind(mut self, kind: FieldKind) -> Self {
        self.id_kind = kind;
        self
    }

    /// Declare that documents of this root embed `entity_class`, referenced
    /// through `id_field`.
    pub fn embeds(
        mut self,
        entity_class: impl Into<String>,
        id_field: impl Into<String>,
        kind: FieldKind,
    ) -> Self {
        self.embedded.push(EmbeddedField {
            entity_class: entity_class.into(),
            id_field: id_field.into(),
            kind,
        });
        self
    }

    /// Reference fields through which `entity_class` is embedded.
    pub fn fields_embedding<'a>(
        &'a self,
        entity_class: &'a str,
    ) -> impl Iterator<Item = &'a EmbeddedField> + 'a {
        self.embedded
            .iter()
            .filter(move |e| e.entity_class == entity_class)
    }

    fn field(&self, id_field: &str) -> Option<&EmbeddedField> {
        self.embedded.iter().find(|e| e.id_field == id_field)
    }
}

/// All index roots known to the apply consumer.
#[derive(Debug, Clone, Default)]
pub struct IndexMetadata {
    roots: BTreeMap<String, IndexRootMetadata>,
    contained_in: BTreeMap<String, Vec<String>>,
}

impl IndexMetadata {
    pub fn builder() -> IndexMetadataBuilder {
        IndexMetadataBuilder::default()
    }

    pub fn root(&self, root_type: &str) -> Option<&IndexRootMetadata> {
        self.roots.get(root_type)
    }

    pub fn is_root(&self, entity_class: &str) -> bool {
        self.roots.contains_key(entity_class)
    }

    pub fn roots(&self) -> impl Iterator<Item = &IndexRootMetadata> {
        self.roots.values()
    }

    /// Root types whose documents contain `entity_class`. A root contains
    /// itself. Unknown classes are contained nowhere.
    pub fn contained_in_index_of(&self, entity_class: &str) -> &[String] {
        self.contained_in
            .get(entity_class)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Canonical id of a root document.
    pub fn normalize_root_id(&self, root_type: &str, id: &EntityId) -> Result<EntityId, IndexError> {
        let root = self.require_root(root_type)?;
        root.id_kind.normalize(root_type, id)
    }

    /// Rewrite a loaded document so that its id and references use the
    /// comparison types declared for its root.
    pub fn normalize_document(&self, mut doc: IndexDocument) -> Result<IndexDocument, IndexError> {
        let root = self.require_root(&doc.root_type)?;
        doc.id = root.id_kind.normalize(&root.root_type, &doc.id)?;
        for (field, ids) in doc.embedded.iter_mut() {
            if let Some(embedded) = root.field(field) {
                for id in ids.iter_mut() {
                    *id = embedded.kind.normalize(field, id)?;
                }
            }
        }
        Ok(doc)
    }

    fn require_root(&self, root_type: &str) -> Result<&IndexRootMetadata, IndexError> {
        self.roots
            .get(root_type)
            .ok_or_else(|| IndexError::Metadata(format!("{} is not an index root", root_type)))
    }
}

/// Builder for [`IndexMetadata`].
#[derive(Debug, Default)]
pub struct IndexMetadataBuilder {
    roots: Vec<IndexRootMetadata>,
}

impl IndexMetadataBuilder {
    pub fn root(mut self, root: IndexRootMetadata) -> Self {
        self.roots.push(root);
        self
    }

    /// Validate the declared roots and compute the containment lookup.
    pub fn build(self) -> Result<IndexMetadata, IndexError> {
        let mut metadata = IndexMetadata::default();
        for root in self.roots {
            if root.root_type.trim().is_empty() {
                return Err(IndexError::Metadata("root type must not be empty".into()));
            }
            let mut seen = HashSet::new();
            for embedded in &root.embedded {
                if embedded.id_field.trim().is_empty() {
                    return Err(IndexError::Metadata(format!(
                        "{} embeds {} without an id field",
                        root.root_type, embedded.entity_class
                    )));
                }
                if !seen.insert(embedded.id_field.as_str()) {
                    return Err(IndexError::Metadata(format!(
                        "{} declares reference field {} twice",
                        root.root_type, embedded.id_field
                    )));
                }
            }
            if metadata.roots.contains_key(&root.root_type) {
                return Err(IndexError::Metadata(format!(
                    "duplicate index root {}",
                    root.root_type
                )));
            }
            metadata.roots.insert(root.root_type.clone(), root);
        }

        for root in metadata.roots.values() {
            add_container(&mut metadata.contained_in, &root.root_type, &root.root_type);
            for embedded in &root.embedded {
                add_container(&mut metadata.contained_in, &embedded.entity_class, &root.root_type);
            }
        }
        Ok(metadata)
    }
}

fn add_container(map: &mut BTreeMap<String, Vec<String>>, class: &str, root: &str) {
    let roots = map.entry(class.to_string()).or_default();
    if !roots.iter().any(|r| r == root) {
        roots.push(root.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> IndexMetadata {
        IndexMetadata::builder()
            .root(IndexRootMetadata::new("Place"))
            .root(
                IndexRootMetadata::new("Sorcerer")
                    .embeds("Place", "place_id", FieldKind::Numeric)
                    .embeds("Place", "birth_place_id", FieldKind::Numeric)
                    .embeds("Wand", "wand_code", FieldKind::String),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_contained_in_index_of() {
        let metadata = metadata();
        assert_eq!(metadata.contained_in_index_of("Place"), ["Place", "Sorcerer"]);
        assert_eq!(metadata.contained_in_index_of("Sorcerer"), ["Sorcerer"]);
        assert_eq!(metadata.contained_in_index_of("Wand"), ["Sorcerer"]);
        assert!(metadata.contained_in_index_of("Broom").is_empty());
        assert!(metadata.is_root("Place"));
        assert!(!metadata.is_root("Wand"));
    }

    #[test]
    fn test_fields_embedding() {
        let metadata = metadata();
        let sorcerer = metadata.root("Sorcerer").unwrap();
        let fields: Vec<_> = sorcerer
            .fields_embedding("Place")
            .map(|f| f.id_field.as_str())
            .collect();
        assert_eq!(fields, vec!["place_id", "birth_place_id"]);
    }

    #[test]
    fn test_field_kind_rendering() {
        assert_eq!(
            FieldKind::Numeric.render("place_id", &EntityId::Text("007".into())).unwrap(),
            "7"
        );
        assert_eq!(
            FieldKind::String.render("wand_code", &EntityId::Text("007".into())).unwrap(),
            "007"
        );
        assert_eq!(
            FieldKind::String.normalize("wand_code", &EntityId::Int(7)).unwrap(),
            EntityId::Text("7".into())
        );
        let err = FieldKind::Numeric
            .render("place_id", &EntityId::Text("oak".into()))
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_normalize_document() {
        let doc = IndexDocument::new("Sorcerer", EntityId::Text("3".into()))
            .embed("place_id", EntityId::Text("01".into()))
            .embed("wand_code", EntityId::Int(9))
            .embed("undeclared", EntityId::Text("x".into()));
        let doc = metadata().normalize_document(doc).unwrap();
        assert_eq!(doc.id, EntityId::Int(3));
        assert_eq!(doc.embedded["place_id"], vec![EntityId::Int(1)]);
        assert_eq!(doc.embedded["wand_code"], vec![EntityId::Text("9".into())]);
        assert_eq!(doc.embedded["undeclared"], vec![EntityId::Text("x".into())]);
    }

    #[test]
    fn test_rejects_duplicates() {
        let err = IndexMetadata::builder()
            .root(IndexRootMetadata::new("Place"))
            .root(IndexRootMetadata::new("Place"))
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "Index metadata error: duplicate index root Place");

        let err = IndexMetadata::builder()
            .root(
                IndexRootMetadata::new("Sorcerer")
                    .embeds("Place", "place_id", FieldKind::Numeric)
                    .embeds("Town", "place_id", FieldKind::Numeric),
            )
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("place_id twice"));
    }

    #[test]
    fn test_unknown_root_is_metadata_error() {
        let err = metadata()
            .normalize_root_id("Wand", &EntityId::Int(1))
            .unwrap_err();
        assert!(matches!(err, IndexError::Metadata(_)));
    }
}
