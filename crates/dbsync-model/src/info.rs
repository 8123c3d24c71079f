//! Event model metadata for one update-log table.
//!
//! An [`EventModelInfo`] describes how a row of an update-log table maps
//! back to one or more original entities. Instances are only obtainable
//! through [`EventModelInfoBuilder::build`], which enforces the arity,
//! column and naming rules, so every instance downstream is valid.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use dbsync_types::{ChangeEvent, ColumnValue, EventType, Hints, Row};

use crate::bridge::IdBridge;
use crate::error::ModelError;

pub const DEFAULT_UPDATE_ID_COLUMN: &str = "update_id";
pub const DEFAULT_EVENT_TYPE_COLUMN: &str = "event_type";

/// SQL type of a mapped log-table column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    Int,
    #[default]
    Long,
    /// Character column with a maximum length
    Varchar(u32),
}

impl std::str::FromStr for ColumnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "int" | "integer" => Ok(ColumnType::Int),
            "long" | "bigint" => Ok(ColumnType::Long),
            "string" | "varchar" => Ok(ColumnType::Varchar(255)),
            _ => {
                let len = lower
                    .strip_prefix("varchar(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .and_then(|n| n.trim().parse::<u32>().ok())
                    .ok_or_else(|| format!("unknown column type: {}", s))?;
                Ok(ColumnType::Varchar(len))
            }
        }
    }
}

impl TryFrom<String> for ColumnType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Int => write!(f, "int"),
            ColumnType::Long => write!(f, "long"),
            ColumnType::Varchar(len) => write!(f, "varchar({})", len),
        }
    }
}

/// How to recover one original entity's class and id from a log row.
#[derive(Debug, Clone)]
pub struct IdInfo {
    entity_class: String,
    columns_in_update_table: Vec<String>,
    columns_in_original: Vec<String>,
    column_types: Vec<ColumnType>,
    bridge: IdBridge,
    hints: Hints,
}

impl IdInfo {
    /// Create an id info, checking that both column lists have the same,
    /// non-zero length. Column types default to [`ColumnType::Long`].
    pub fn new(
        entity_class: impl Into<String>,
        columns_in_update_table: Vec<String>,
        columns_in_original: Vec<String>,
        bridge: IdBridge,
    ) -> Result<Self, ModelError> {
        let entity_class = entity_class.into();
        if columns_in_update_table.len() != columns_in_original.len() {
            return Err(ModelError::ArityMismatch {
                entity_class,
                update_columns: columns_in_update_table.len(),
                original_columns: columns_in_original.len(),
            });
        }
        if columns_in_update_table.is_empty() {
            return Err(ModelError::NoColumns { entity_class });
        }
        let column_types = vec![ColumnType::default(); columns_in_update_table.len()];
        Ok(Self {
            entity_class,
            columns_in_update_table,
            columns_in_original,
            column_types,
            bridge,
            hints: Hints::new(),
        })
    }

    /// Single-column id info using the same column name on both sides.
    pub fn single(
        entity_class: impl Into<String>,
        column: impl Into<String>,
        bridge: IdBridge,
    ) -> Result<Self, ModelError> {
        let column = column.into();
        Self::new(entity_class, vec![column.clone()], vec![column], bridge)
    }

    pub fn with_column_types(mut self, column_types: Vec<ColumnType>) -> Result<Self, ModelError> {
        if column_types.len() != self.columns_in_update_table.len() {
            return Err(ModelError::ColumnTypeArity {
                entity_class: self.entity_class,
                expected: self.columns_in_update_table.len(),
                actual: column_types.len(),
            });
        }
        self.column_types = column_types;
        Ok(self)
    }

    pub fn with_hints(mut self, hints: Hints) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.hints.insert(key.into(), value.into());
        self
    }

    pub fn entity_class(&self) -> &str {
        &self.entity_class
    }

    pub fn columns_in_update_table(&self) -> &[String] {
        &self.columns_in_update_table
    }

    pub fn columns_in_original(&self) -> &[String] {
        &self.columns_in_original
    }

    pub fn column_types(&self) -> &[ColumnType] {
        &self.column_types
    }

    pub fn bridge(&self) -> &IdBridge {
        &self.bridge
    }

    pub fn hints(&self) -> &Hints {
        &self.hints
    }

    /// Read this id info's columns from a log row and run the bridge.
    ///
    /// Returns `None` when every column is NULL: the row does not reference
    /// an entity of this class, as with an unset foreign key.
    pub fn to_event(
        &self,
        table: &str,
        row: &Row,
        event_type: EventType,
    ) -> Result<Option<ChangeEvent>, ModelError> {
        let values = self
            .columns_in_update_table
            .iter()
            .map(|column| {
                row.get(column)
                    .cloned()
                    .ok_or_else(|| ModelError::MissingColumn {
                        table: table.to_string(),
                        column: column.clone(),
                    })
            })
            .collect::<Result<Vec<ColumnValue>, _>>()?;
        if values.iter().all(ColumnValue::is_null) {
            debug!(
                table = %table,
                entity_class = %self.entity_class,
                "Id columns are NULL, no event"
            );
            return Ok(None);
        }
        let id = self.bridge.convert(&values)?;
        Ok(Some(
            ChangeEvent::new(self.entity_class.clone(), id, event_type)
                .with_hints(self.hints.clone()),
        ))
    }
}

/// One column of a log table that carries id data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateColumn {
    pub column_in_update_table: String,
    pub column_in_original: String,
    pub column_type: ColumnType,
}

/// Static metadata describing one update-log table.
#[derive(Debug, Clone)]
pub struct EventModelInfo {
    update_table_name: String,
    original_table_name: String,
    event_type_column: String,
    update_id_column: String,
    id_infos: Vec<IdInfo>,
    update_columns: Vec<UpdateColumn>,
}

impl EventModelInfo {
    pub fn builder(
        update_table_name: impl Into<String>,
        original_table_name: impl Into<String>,
    ) -> EventModelInfoBuilder {
        EventModelInfoBuilder {
            update_table_name: update_table_name.into(),
            original_table_name: original_table_name.into(),
            event_type_column: DEFAULT_EVENT_TYPE_COLUMN.to_string(),
            update_id_column: DEFAULT_UPDATE_ID_COLUMN.to_string(),
            id_infos: Vec::new(),
        }
    }

    pub fn update_table_name(&self) -> &str {
        &self.update_table_name
    }

    pub fn original_table_name(&self) -> &str {
        &self.original_table_name
    }

    pub fn event_type_column(&self) -> &str {
        &self.event_type_column
    }

    pub fn update_id_column(&self) -> &str {
        &self.update_id_column
    }

    pub fn id_infos(&self) -> &[IdInfo] {
        &self.id_infos
    }

    /// Distinct id-carrying columns of the log table, in declaration order.
    pub fn update_columns(&self) -> &[UpdateColumn] {
        &self.update_columns
    }

    /// Read the monotonic log id of a row.
    pub fn update_id(&self, row: &Row) -> Result<i64, ModelError> {
        let value = self.column(row, &self.update_id_column)?;
        value.as_i64().ok_or_else(|| ModelError::InvalidUpdateId {
            table: self.update_table_name.clone(),
            value: value.to_string(),
        })
    }

    pub fn event_type(&self, row: &Row) -> Result<EventType, ModelError> {
        let value = self.column(row, &self.event_type_column)?;
        let code = value.as_i64().ok_or_else(|| ModelError::InvalidEventType {
            table: self.update_table_name.clone(),
            value: value.to_string(),
        })?;
        Ok(EventType::from_code(code)?)
    }

    /// Decode one log row into one change event per id info whose columns
    /// are not all NULL.
    pub fn events_for_row(&self, row: &Row) -> Result<Vec<ChangeEvent>, ModelError> {
        let event_type = self.event_type(row)?;
        let mut events = Vec::with_capacity(self.id_infos.len());
        for info in &self.id_infos {
            if let Some(event) = info.to_event(&self.update_table_name, row, event_type)? {
                events.push(event);
            }
        }
        debug!(
            table = %self.update_table_name,
            event_type = %event_type,
            count = events.len(),
            "Decoded log row"
        );
        Ok(events)
    }

    fn column<'a>(&self, row: &'a Row, column: &str) -> Result<&'a ColumnValue, ModelError> {
        row.get(column).ok_or_else(|| ModelError::MissingColumn {
            table: self.update_table_name.clone(),
            column: column.to_string(),
        })
    }
}

/// Builder for [`EventModelInfo`].
#[derive(Debug, Clone)]
pub struct EventModelInfoBuilder {
    update_table_name: String,
    original_table_name: String,
    event_type_column: String,
    update_id_column: String,
    id_infos: Vec<IdInfo>,
}

impl EventModelInfoBuilder {
    pub fn event_type_column(mut self, column: impl Into<String>) -> Self {
        self.event_type_column = column.into();
        self
    }

    pub fn update_id_column(mut self, column: impl Into<String>) -> Self {
        self.update_id_column = column.into();
        self
    }

    pub fn id_info(mut self, info: IdInfo) -> Self {
        self.id_infos.push(info);
        self
    }

    pub fn build(self) -> Result<EventModelInfo, ModelError> {
        if self.id_infos.is_empty() {
            return Err(ModelError::MissingIdInfo {
                table: self.update_table_name,
            });
        }
        if self.update_table_name == self.original_table_name {
            return Err(ModelError::NamingConflict {
                update_table: self.update_table_name.clone(),
                clashes_with: self.update_table_name,
                original_table: self.original_table_name,
            });
        }

        let update_columns = collect_update_columns(&self.update_table_name, &self.id_infos)?;
        for reserved in [&self.update_id_column, &self.event_type_column] {
            if update_columns
                .iter()
                .any(|c| &c.column_in_update_table == reserved)
            {
                return Err(ModelError::ReservedColumn {
                    table: self.update_table_name,
                    column: reserved.clone(),
                });
            }
        }
        if self.update_id_column == self.event_type_column {
            return Err(ModelError::ReservedColumn {
                table: self.update_table_name,
                column: self.update_id_column,
            });
        }

        Ok(EventModelInfo {
            update_table_name: self.update_table_name,
            original_table_name: self.original_table_name,
            event_type_column: self.event_type_column,
            update_id_column: self.update_id_column,
            id_infos: self.id_infos,
            update_columns,
        })
    }
}

/// Merge the columns of all id infos. Shared update-table columns must map
/// to the same original column with the same type.
fn collect_update_columns(table: &str, infos: &[IdInfo]) -> Result<Vec<UpdateColumn>, ModelError> {
    let mut columns: Vec<UpdateColumn> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for info in infos {
        for ((update_col, original_col), column_type) in info
            .columns_in_update_table
            .iter()
            .zip(&info.columns_in_original)
            .zip(&info.column_types)
        {
            match seen.get(update_col) {
                Some(&idx) => {
                    let existing = &columns[idx];
                    if &existing.column_in_original != original_col
                        || existing.column_type != *column_type
                    {
                        return Err(ModelError::ColumnConflict {
                            table: table.to_string(),
                            column: update_col.clone(),
                        });
                    }
                }
                None => {
                    seen.insert(update_col.clone(), columns.len());
                    columns.push(UpdateColumn {
                        column_in_update_table: update_col.clone(),
                        column_in_original: original_col.clone(),
                        column_type: *column_type,
                    });
                }
            }
        }
    }

    Ok(columns)
}

/// Check naming rules across a whole configuration: update tables are
/// unique, original tables are unique, and no update table shares its name
/// with any original table.
pub fn validate_naming(infos: &[EventModelInfo]) -> Result<(), ModelError> {
    let mut update_tables = HashSet::new();
    // original table name -> update table that captures it
    let mut original_tables: HashMap<&str, &str> = HashMap::new();

    for info in infos {
        if !update_tables.insert(info.update_table_name.as_str()) {
            return Err(ModelError::DuplicateUpdateTable(
                info.update_table_name.clone(),
            ));
        }
        if original_tables
            .insert(
                info.original_table_name.as_str(),
                info.update_table_name.as_str(),
            )
            .is_some()
        {
            return Err(ModelError::DuplicateOriginalTable(
                info.original_table_name.clone(),
            ));
        }
    }

    for info in infos {
        if let Some(owner) = original_tables.get(info.update_table_name.as_str()) {
            return Err(ModelError::NamingConflict {
                update_table: info.update_table_name.clone(),
                original_table: info.original_table_name.clone(),
                clashes_with: owner.to_string(),
            });
        }
    }

    Ok(())
}
