//! Dialect abstraction for trigger and update-log DDL.
//!
//! A dialect produces plain SQL strings for one [`EventModelInfo`]:
//! - bootstrap code for the shared unique-id generator, run once
//! - creation and drop of the update-log table
//! - one trigger per (original table, event type)
//! - dialect specific per-table code such as cleanup triggers
//!
//! Every operation returns an ordered list of statements because some
//! dialects need several statements per logical step.

use dbsync_model::{ColumnType, EventModelInfo};
use dbsync_types::{EventType, SqlDialectKind};

use crate::error::TriggerError;
use crate::mysql::MySqlTriggerDialect;
use crate::postgres::PostgresTriggerDialect;

pub const DEFAULT_TABLE_PREFIX: &str = "dbsync_";

/// SQL generator for update-log triggers.
pub trait TriggerSqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Prefix of every generated object name
    fn table_prefix(&self) -> &str;

    /// Quote an identifier
    fn quote_identifier(&self, name: &str) -> String;

    /// Native type of a mapped log-table column
    fn column_type(&self, column_type: ColumnType) -> String;

    /// Shared unique-id infrastructure, run once before any log table.
    fn setup_code(&self) -> Vec<String>;

    /// Removes what [`TriggerSqlDialect::setup_code`] created.
    fn unsetup_code(&self) -> Vec<String>;

    fn update_table_creation_code(&self, info: &EventModelInfo)
        -> Result<Vec<String>, TriggerError>;

    fn update_table_drop_code(&self, info: &EventModelInfo) -> Vec<String>;

    /// Trigger on the original table writing one log row per change.
    /// DELETE triggers read `OLD`, INSERT and UPDATE triggers read `NEW`.
    fn trigger_creation_code(
        &self,
        info: &EventModelInfo,
        event_type: EventType,
    ) -> Result<Vec<String>, TriggerError>;

    fn trigger_drop_code(&self, info: &EventModelInfo, event_type: EventType) -> Vec<String>;

    /// Per-log-table code beyond the table itself, e.g. a cleanup trigger.
    fn specific_setup_code(&self, info: &EventModelInfo) -> Vec<String>;

    fn specific_unsetup_code(&self, info: &EventModelInfo) -> Vec<String>;

    /// Name of the trigger for one (log table, event type).
    fn trigger_name(&self, info: &EventModelInfo, event_type: EventType) -> String {
        format!(
            "{}{}_{}",
            self.table_prefix(),
            info.update_table_name(),
            event_type
        )
    }
}

/// Reject a log table that would be written with zero mapped columns.
pub(crate) fn ensure_columns(info: &EventModelInfo) -> Result<(), TriggerError> {
    if info.update_columns().is_empty() {
        return Err(TriggerError::NoColumns {
            table: info.update_table_name().to_string(),
        });
    }
    Ok(())
}

/// Column list and value list of the INSERT a trigger runs.
///
/// `row_ref` is `NEW` or `OLD`; `id_expr` produces the unique log id.
pub(crate) fn insert_lists(
    dialect: &dyn TriggerSqlDialect,
    info: &EventModelInfo,
    event_type: EventType,
    id_expr: &str,
) -> (String, String) {
    let row_ref = match event_type {
        EventType::Delete => "OLD",
        EventType::Insert | EventType::Update => "NEW",
    };
    let mut columns = vec![
        dialect.quote_identifier(info.update_id_column()),
        dialect.quote_identifier(info.event_type_column()),
    ];
    let mut values = vec![id_expr.to_string(), event_type.code().to_string()];
    for column in info.update_columns() {
        columns.push(dialect.quote_identifier(&column.column_in_update_table));
        values.push(format!(
            "{}.{}",
            row_ref,
            dialect.quote_identifier(&column.column_in_original)
        ));
    }
    (columns.join(", "), values.join(", "))
}

/// Build the dialect for a configured kind.
pub fn dialect_for(kind: SqlDialectKind, table_prefix: &str) -> Box<dyn TriggerSqlDialect> {
    match kind {
        SqlDialectKind::Mysql => Box::new(MySqlTriggerDialect::new(table_prefix)),
        SqlDialectKind::Postgres => Box::new(PostgresTriggerDialect::new(table_prefix)),
    }
}
