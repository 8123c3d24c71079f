//! Persistent index engine on Tantivy.
//!
//! A unit of work buffers its mutations and applies them under the shared
//! writer lock on commit, followed by a Tantivy commit and a reader reload.
//! Replacing a document deletes its `_key` term before adding the new
//! version, so re-applying the same mutation leaves one document.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tantivy::collector::TopDocs;
use tantivy::directory::error::LockError;
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{
    DocAddress, Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument,
    TantivyError, Term,
};
use tracing::{debug, info, warn};

use dbsync_types::{EntityId, Settings};

use crate::document::{document_key, FieldCondition, IndexDocument};
use crate::engine::{IndexEngine, IndexWork};
use crate::error::IndexError;
use crate::schema::{build_sync_schema, SyncSchema};

/// Writer memory budget when none is configured
pub const DEFAULT_WRITER_MEMORY_MB: usize = 50;

/// Location and writer budget of a [`TantivyIndexEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TantivyEngineConfig {
    pub index_path: PathBuf,
    pub writer_memory_mb: usize,
}

impl TantivyEngineConfig {
    pub fn new(index_path: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            writer_memory_mb: DEFAULT_WRITER_MEMORY_MB,
        }
    }

    /// Index directory (with `~` expanded) and writer budget from settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            index_path: settings.expanded_index_path(),
            writer_memory_mb: settings.writer_memory_mb,
        }
    }

    pub fn with_writer_memory_mb(mut self, mb: usize) -> Self {
        self.writer_memory_mb = mb;
        self
    }
}

struct Shared {
    schema: SyncSchema,
    writer: Mutex<IndexWriter>,
    reader: IndexReader,
    query_parser: QueryParser,
}

/// [`IndexEngine`] over a Tantivy index in a directory.
///
/// The engine owns the directory's single writer: a second engine on the
/// same directory fails with [`IndexError::IndexLocked`].
#[derive(Clone)]
pub struct TantivyIndexEngine {
    shared: Arc<Shared>,
    path: PathBuf,
}

impl TantivyIndexEngine {
    /// Open the index in `config.index_path`, creating the directory and an
    /// empty root-document index when none exists. An existing index must
    /// carry the root-document schema.
    pub fn open_or_create(config: TantivyEngineConfig) -> Result<Self, IndexError> {
        let index = open_index_dir(&config.index_path)?;
        let schema = SyncSchema::from_schema(index.schema())?;

        let writer = index
            .writer(config.writer_memory_mb * 1024 * 1024)
            .map_err(|e| match e {
                TantivyError::LockFailure(LockError::LockBusy, _) => IndexError::IndexLocked(
                    format!("{} has another writer", config.index_path.display()),
                ),
                other => IndexError::Tantivy(other),
            })?;
        // lookups see committed state only; TantivyWork::commit reloads
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let query_parser = QueryParser::for_index(&index, vec![schema.text]);

        info!(
            path = ?config.index_path,
            writer_memory_mb = config.writer_memory_mb,
            documents = reader.searcher().num_docs(),
            "Opened index engine"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                schema,
                writer: Mutex::new(writer),
                reader,
                query_parser,
            }),
            path: config.index_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of documents visible to readers.
    pub fn num_docs(&self) -> u64 {
        self.shared.reader.searcher().num_docs()
    }

    /// Stored document of `(root_type, id)`, if committed.
    pub fn document(
        &self,
        root_type: &str,
        id: &EntityId,
    ) -> Result<Option<IndexDocument>, IndexError> {
        let schema = &self.shared.schema;
        let searcher = self.shared.reader.searcher();
        let term = Term::from_field_text(schema.key, &document_key(root_type, id)?);
        let query = TermQuery::new(term, IndexRecordOption::Basic);
        let top_docs = searcher.search(&query, &TopDocs::with_limit(1))?;
        match top_docs.first() {
            Some((_, address)) => {
                let doc: TantivyDocument = searcher.doc(*address)?;
                let body = doc
                    .get_first(schema.body)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| IndexError::SchemaMismatch("document without body".into()))?;
                Ok(Some(serde_json::from_str(body)?))
            }
            None => Ok(None),
        }
    }

    /// Full-text search over the documents of one root type.
    pub fn search_text(
        &self,
        root_type: &str,
        query_str: &str,
        limit: usize,
    ) -> Result<Vec<EntityId>, IndexError> {
        if query_str.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let schema = &self.shared.schema;
        let text_query = self.shared.query_parser.parse_query(query_str)?;
        let query = BooleanQuery::new(vec![
            (Occur::Must, text_query),
            (Occur::Must, root_query(schema, root_type)),
        ]);
        let searcher = self.shared.reader.searcher();
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;
        let ids = top_docs
            .into_iter()
            .map(|(_, address)| read_id(&searcher, schema, address))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(root = root_type, query = query_str, results = ids.len(), "Text search complete");
        Ok(ids)
    }
}

fn open_index_dir(path: &Path) -> Result<Index, IndexError> {
    std::fs::create_dir_all(path)?;
    let directory = MmapDirectory::open(path).map_err(TantivyError::from)?;
    Index::open_or_create(directory, build_sync_schema().schema().clone()).map_err(|e| match e {
        TantivyError::SchemaError(message) => IndexError::SchemaMismatch(format!(
            "{}: {}",
            path.display(),
            message
        )),
        other => IndexError::Tantivy(other),
    })
}

fn root_query(schema: &SyncSchema, root_type: &str) -> Box<dyn Query> {
    Box::new(TermQuery::new(
        Term::from_field_text(schema.root, root_type),
        IndexRecordOption::Basic,
    ))
}

fn read_id(searcher: &Searcher, schema: &SyncSchema, address: DocAddress) -> Result<EntityId, IndexError> {
    let doc: TantivyDocument = searcher.doc(address)?;
    let raw = doc
        .get_first(schema.id)
        .and_then(|v| v.as_str())
        .ok_or_else(|| IndexError::SchemaMismatch("document without _id".into()))?;
    Ok(serde_json::from_str(raw)?)
}

fn to_tantivy(schema: &SyncSchema, doc: &IndexDocument) -> Result<TantivyDocument, IndexError> {
    let mut tdoc = TantivyDocument::default();
    tdoc.add_text(schema.key, doc.key()?);
    tdoc.add_text(schema.root, &doc.root_type);
    tdoc.add_text(schema.id, serde_json::to_string(&doc.id)?);
    for term in doc.reference_terms()? {
        tdoc.add_text(schema.refs, term);
    }
    tdoc.add_text(schema.text, doc.text());
    tdoc.add_text(schema.body, serde_json::to_string(doc)?);
    Ok(tdoc)
}

#[async_trait]
impl IndexEngine for TantivyIndexEngine {
    async fn begin(&self) -> Result<Box<dyn IndexWork>, IndexError> {
        Ok(Box::new(TantivyWork {
            shared: Arc::clone(&self.shared),
            pending: Vec::new(),
        }))
    }

    async fn query_ids(
        &self,
        root_type: &str,
        condition: &FieldCondition,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<EntityId>, IndexError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let schema = &self.shared.schema;
        let term = condition.term()?;
        let ref_query: Box<dyn Query> = Box::new(TermQuery::new(
            Term::from_field_text(schema.refs, &term),
            IndexRecordOption::Basic,
        ));
        let query = BooleanQuery::new(vec![
            (Occur::Must, root_query(schema, root_type)),
            (Occur::Must, ref_query),
        ]);
        let searcher = self.shared.reader.searcher();
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit).and_offset(offset))?;
        let ids = top_docs
            .into_iter()
            .map(|(_, address)| read_id(&searcher, schema, address))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            root = root_type,
            term = %term,
            offset,
            results = ids.len(),
            "Reference lookup complete"
        );
        Ok(ids)
    }
}

enum Pending {
    Add(IndexDocument),
    Delete(String),
}

struct TantivyWork {
    shared: Arc<Shared>,
    pending: Vec<Pending>,
}

impl TantivyWork {
    fn apply(&self, writer: &mut IndexWriter) -> Result<(), IndexError> {
        let schema = &self.shared.schema;
        for pending in &self.pending {
            match pending {
                Pending::Add(doc) => {
                    writer.delete_term(Term::from_field_text(schema.key, &doc.key()?));
                    writer.add_document(to_tantivy(schema, doc)?)?;
                }
                Pending::Delete(key) => {
                    writer.delete_term(Term::from_field_text(schema.key, key));
                }
            }
        }
        writer.commit()?;
        Ok(())
    }
}

#[async_trait]
impl IndexWork for TantivyWork {
    async fn add_or_replace(&mut self, doc: IndexDocument) -> Result<(), IndexError> {
        self.pending.push(Pending::Add(doc));
        Ok(())
    }

    async fn delete_by_id(&mut self, root_type: &str, id: &EntityId) -> Result<(), IndexError> {
        self.pending.push(Pending::Delete(document_key(root_type, id)?));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), IndexError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        {
            let mut writer = self
                .shared
                .writer
                .lock()
                .map_err(|e| IndexError::IndexLocked(e.to_string()))?;
            if let Err(e) = self.apply(&mut writer) {
                if let Err(rollback) = writer.rollback() {
                    warn!(error = %rollback, "Writer rollback failed");
                }
                return Err(e);
            }
        }
        self.shared.reader.reload()?;
        info!(mutations = self.pending.len(), "Committed index work");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), IndexError> {
        debug!(discarded = self.pending.len(), "Discarded index work");
        Ok(())
    }
}
