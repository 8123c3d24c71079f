//! In-process implementation of the data-access contract.
//!
//! `MemoryDatabase` keeps original tables and update-log tables as row
//! vectors and fires simulated triggers on every original-table write, the
//! way the generated database triggers do: one log row per write, carrying
//! a fresh id from a counter shared by all log tables, the event type code,
//! and the mapped columns taken from the new row (insert, update) or the old
//! row (delete).
//!
//! Transactions buffer their deletes and apply them on commit, so a rolled
//! back tick leaves every log row in place. Failures can be injected per
//! operation to exercise rollback and redelivery paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use dbsync_model::EventModelInfo;
use dbsync_types::{ColumnValue, EventType, Row};

use crate::database::{Database, Transaction};
use crate::error::StorageError;

/// Operation at which an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Begin,
    Count,
    Fetch,
    Delete,
    Commit,
    Ddl,
}

#[derive(Debug, Clone)]
struct LogTrigger {
    update_table: String,
    update_id_column: String,
    event_type_column: String,
    /// (column in log table, column in original table)
    columns: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, Vec<Row>>,
    triggers: HashMap<String, Vec<LogTrigger>>,
    next_update_id: i64,
    failures: HashMap<FailPoint, usize>,
    ddl_log: Vec<String>,
    ddl_objects: HashSet<(String, String)>,
}

impl MemoryState {
    fn take_failure(&mut self, point: FailPoint) -> Result<(), StorageError> {
        match self.failures.get_mut(&point) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StorageError::Query(format!("injected failure at {:?}", point)))
            }
            _ => Ok(()),
        }
    }

    fn fire(&mut self, original_table: &str, event_type: EventType, row: &Row) {
        let Some(triggers) = self.triggers.get(original_table).cloned() else {
            return;
        };
        for trigger in triggers {
            self.next_update_id += 1;
            let mut log_row = Row::new();
            log_row.insert(
                trigger.update_id_column.clone(),
                ColumnValue::Int(self.next_update_id),
            );
            log_row.insert(
                trigger.event_type_column.clone(),
                ColumnValue::Int(event_type.code()),
            );
            for (log_column, original_column) in &trigger.columns {
                let value = row.get(original_column).cloned().unwrap_or(ColumnValue::Null);
                log_row.insert(log_column.clone(), value);
            }
            debug!(
                table = %trigger.update_table,
                update_id = self.next_update_id,
                event_type = %event_type,
                "Trigger fired"
            );
            self.tables
                .entry(trigger.update_table.clone())
                .or_default()
                .push(log_row);
        }
    }
}

/// In-memory relational database with simulated update-log triggers.
#[derive(Debug, Clone)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the log table for `info` and install its triggers on the
    /// original table.
    pub fn register_log_table(&self, info: &EventModelInfo) {
        let trigger = LogTrigger {
            update_table: info.update_table_name().to_string(),
            update_id_column: info.update_id_column().to_string(),
            event_type_column: info.event_type_column().to_string(),
            columns: info
                .update_columns()
                .iter()
                .map(|c| (c.column_in_update_table.clone(), c.column_in_original.clone()))
                .collect(),
        };
        let mut state = self.state();
        state
            .tables
            .entry(info.update_table_name().to_string())
            .or_default();
        state
            .tables
            .entry(info.original_table_name().to_string())
            .or_default();
        state
            .triggers
            .entry(info.original_table_name().to_string())
            .or_default()
            .push(trigger);
    }

    /// Create an empty table without triggers.
    pub fn create_table(&self, table: &str) {
        self.state().tables.entry(table.to_string()).or_default();
    }

    pub fn insert_original(&self, table: &str, row: Row) {
        let mut state = self.state();
        state.fire(table, EventType::Insert, &row);
        state.tables.entry(table.to_string()).or_default().push(row);
    }

    /// Replace the row whose `key_column` matches the new row's value.
    /// Returns whether a row was replaced.
    pub fn update_original(&self, table: &str, key_column: &str, row: Row) -> bool {
        let mut state = self.state();
        let key = row.get(key_column).cloned();
        let replaced = match state.tables.get_mut(table) {
            Some(rows) => match rows.iter_mut().find(|r| r.get(key_column) == key.as_ref()) {
                Some(existing) => {
                    *existing = row.clone();
                    true
                }
                None => false,
            },
            None => false,
        };
        if replaced {
            state.fire(table, EventType::Update, &row);
        }
        replaced
    }

    /// Delete the row whose `key_column` equals `key`. Returns whether a row
    /// was deleted.
    pub fn delete_original(&self, table: &str, key_column: &str, key: &ColumnValue) -> bool {
        let mut state = self.state();
        let removed = state.tables.get_mut(table).and_then(|rows| {
            let pos = rows.iter().position(|r| r.get(key_column) == Some(key))?;
            Some(rows.remove(pos))
        });
        match removed {
            Some(old) => {
                state.fire(table, EventType::Delete, &old);
                true
            }
            None => false,
        }
    }

    /// Find one row of `table` by key.
    pub fn find(&self, table: &str, key_column: &str, key: &ColumnValue) -> Option<Row> {
        self.state()
            .tables
            .get(table)
            .and_then(|rows| rows.iter().find(|r| r.get(key_column) == Some(key)).cloned())
    }

    /// Committed rows of `table`, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state().tables.get(table).cloned().unwrap_or_default()
    }

    /// Append a raw row to a table without firing triggers.
    pub fn insert_raw(&self, table: &str, row: Row) {
        self.state().tables.entry(table.to_string()).or_default().push(row);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make the next `times` calls of `point` fail.
    pub fn fail_next(&self, point: FailPoint, times: usize) {
        self.state().failures.insert(point, times);
    }

    /// Every DDL statement executed so far, in order.
    pub fn ddl_log(&self) -> Vec<String> {
        self.state().ddl_log.clone()
    }
}

/// Object touched by a CREATE or DROP statement.
#[derive(Debug, PartialEq, Eq)]
struct DdlObject {
    create: bool,
    /// `IF [NOT] EXISTS` present
    guarded: bool,
    kind: String,
    name: String,
}

/// `CREATE OR REPLACE` statements never collide and yield `None`.
fn ddl_object(sql: &str) -> Option<DdlObject> {
    let upper: Vec<String> = sql
        .split_whitespace()
        .map(|t| t.to_ascii_uppercase())
        .collect();
    let raw: Vec<&str> = sql.split_whitespace().collect();
    let is_create = match upper.first().map(String::as_str) {
        Some("CREATE") => true,
        Some("DROP") => false,
        _ => return None,
    };
    if upper.get(1).map(String::as_str) == Some("OR") {
        return None;
    }
    let kind = upper.get(1)?.clone();
    let mut idx = 2;
    let mut guarded = false;
    while let Some(token) = upper.get(idx) {
        if matches!(token.as_str(), "IF" | "NOT" | "EXISTS") {
            guarded = true;
            idx += 1;
        } else {
            break;
        }
    }
    let name = raw
        .get(idx)?
        .split('(')
        .next()
        .unwrap_or_default()
        .trim_matches(|c| c == '`' || c == '"' || c == ';')
        .to_string();
    Some(DdlObject {
        create: is_create,
        guarded,
        kind,
        name,
    })
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StorageError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory database offline".into()));
        }
        self.state().take_failure(FailPoint::Begin)?;
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            deleted: HashMap::new(),
        }))
    }

    async fn execute_ddl(&self, sql: &str) -> Result<(), StorageError> {
        let mut state = self.state();
        state.take_failure(FailPoint::Ddl)?;
        if let Some(object) = ddl_object(sql) {
            let key = (object.kind, object.name);
            if object.create {
                if state.ddl_objects.contains(&key) && !object.guarded {
                    return Err(StorageError::AlreadyExists(format!("{} {}", key.0, key.1)));
                }
                state.ddl_objects.insert(key);
            } else {
                state.ddl_objects.remove(&key);
            }
        }
        state.ddl_log.push(sql.to_string());
        Ok(())
    }
}

/// Transaction over a [`MemoryDatabase`]. Reads see committed rows minus
/// this transaction's own pending deletes.
pub struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    /// table -> deleted id column values, with the id column name
    deleted: HashMap<String, (String, HashSet<ColumnValue>)>,
}

impl MemoryTransaction {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_deleted(&self, table: &str, row: &Row) -> bool {
        match self.deleted.get(table) {
            Some((column, ids)) => row.get(column).is_some_and(|v| ids.contains(v)),
            None => false,
        }
    }

    fn visible_rows(&self, table: &str) -> Result<Vec<Row>, StorageError> {
        let rows = self
            .state()
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        Ok(rows
            .into_iter()
            .filter(|row| !self.is_deleted(table, row))
            .collect())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn count_rows(&mut self, table: &str) -> Result<u64, StorageError> {
        self.state().take_failure(FailPoint::Count)?;
        Ok(self.visible_rows(table)?.len() as u64)
    }

    async fn fetch_page(
        &mut self,
        table: &str,
        order_column: &str,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Row>, StorageError> {
        self.state().take_failure(FailPoint::Fetch)?;
        let mut rows = self.visible_rows(table)?;
        rows.sort_by_key(|row| row.get(order_column).and_then(ColumnValue::as_i64));
        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit)
            .collect())
    }

    async fn delete_rows(
        &mut self,
        table: &str,
        id_column: &str,
        ids: &[ColumnValue],
    ) -> Result<u64, StorageError> {
        self.state().take_failure(FailPoint::Delete)?;
        let visible = self.visible_rows(table)?;
        let wanted: HashSet<&ColumnValue> = ids.iter().collect();
        let matching: Vec<ColumnValue> = visible
            .iter()
            .filter_map(|row| row.get(id_column))
            .filter(|v| wanted.contains(v))
            .cloned()
            .collect();

        let entry = self
            .deleted
            .entry(table.to_string())
            .or_insert_with(|| (id_column.to_string(), HashSet::new()));
        if entry.0 != id_column {
            return Err(StorageError::Query(format!(
                "table {} deleted by {} and {} in one transaction",
                table, entry.0, id_column
            )));
        }
        let count = matching.len() as u64;
        entry.1.extend(matching);
        Ok(count)
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let mut state = self.state();
        state.take_failure(FailPoint::Commit)?;
        for (table, (column, ids)) in &self.deleted {
            if let Some(rows) = state.tables.get_mut(table) {
                rows.retain(|row| !row.get(column).is_some_and(|v| ids.contains(v)));
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}
