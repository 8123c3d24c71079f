//! Tantivy schema for root documents.
//!
//! The schema is generic over root types: every root shares the same
//! fields, and reference fields are flattened into `field=value` terms.

use tantivy::schema::{Field, Schema, STORED, STRING, TEXT};

use crate::error::IndexError;

/// Schema field handles
#[derive(Debug, Clone)]
pub struct SyncSchema {
    schema: Schema,
    /// Unique document key `root#id` (STRING | STORED)
    pub key: Field,
    /// Root type (STRING | STORED)
    pub root: Field,
    /// JSON encoded entity id (STRING | STORED)
    pub id: Field,
    /// Reference terms `field=value`, multi-valued (STRING)
    pub refs: Field,
    /// Searchable text of all free-text fields (TEXT)
    pub text: Field,
    /// JSON encoded document (STORED)
    pub body: Field,
}

impl SyncSchema {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Create a SyncSchema from an existing Tantivy Schema
    pub fn from_schema(schema: Schema) -> Result<Self, IndexError> {
        let field = |name: &str| {
            schema
                .get_field(name)
                .map_err(|_| IndexError::SchemaMismatch(format!("missing {} field", name)))
        };
        Ok(Self {
            key: field("_key")?,
            root: field("_root")?,
            id: field("_id")?,
            refs: field("_ref")?,
            text: field("text")?,
            body: field("body")?,
            schema,
        })
    }
}

pub fn build_sync_schema() -> SyncSchema {
    let mut builder = Schema::builder();
    let key = builder.add_text_field("_key", STRING | STORED);
    let root = builder.add_text_field("_root", STRING | STORED);
    let id = builder.add_text_field("_id", STRING | STORED);
    let refs = builder.add_text_field("_ref", STRING);
    let text = builder.add_text_field("text", TEXT);
    let body = builder.add_text_field("body", STORED);
    SyncSchema {
        schema: builder.build(),
        key,
        root,
        id,
        refs,
        text,
        body,
    }
}
