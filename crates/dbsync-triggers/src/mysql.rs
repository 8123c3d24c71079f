//! MySQL / MariaDB trigger dialect.
//!
//! Unique log ids come from a shared AUTO_INCREMENT table. A stored
//! procedure inserts a row and returns `LAST_INSERT_ID()`, which is
//! connection-local, so concurrent trigger firings never receive the same
//! value. Each log table gets a cleanup trigger that removes the matching
//! id row when a log row is deleted, keeping the id table bounded.

use dbsync_model::{ColumnType, EventModelInfo};
use dbsync_types::EventType;

use crate::dialect::{ensure_columns, insert_lists, TriggerSqlDialect};
use crate::error::TriggerError;

#[derive(Debug, Clone)]
pub struct MySqlTriggerDialect {
    prefix: String,
}

impl MySqlTriggerDialect {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn id_table(&self) -> String {
        self.quote_identifier(&format!("{}unique_id", self.prefix))
    }

    fn id_procedure(&self) -> String {
        self.quote_identifier(&format!("{}next_id", self.prefix))
    }

    fn cleanup_trigger(&self, info: &EventModelInfo) -> String {
        self.quote_identifier(&format!(
            "{}{}_cleanup",
            self.prefix,
            info.update_table_name()
        ))
    }
}

impl TriggerSqlDialect for MySqlTriggerDialect {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn table_prefix(&self) -> &str {
        &self.prefix
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn column_type(&self, column_type: ColumnType) -> String {
        match column_type {
            ColumnType::Int => "INT".to_string(),
            ColumnType::Long => "BIGINT".to_string(),
            ColumnType::Varchar(len) => format!("VARCHAR({})", len),
        }
    }

    fn setup_code(&self) -> Vec<String> {
        vec![
            format!(
                "CREATE TABLE {} (`id` BIGINT NOT NULL AUTO_INCREMENT, PRIMARY KEY (`id`)) ENGINE=InnoDB",
                self.id_table()
            ),
            format!(
                "CREATE PROCEDURE {}(OUT result BIGINT) BEGIN INSERT INTO {} VALUES (NULL); SET result = LAST_INSERT_ID(); END",
                self.id_procedure(),
                self.id_table()
            ),
        ]
    }

    fn unsetup_code(&self) -> Vec<String> {
        vec![
            format!("DROP PROCEDURE IF EXISTS {}", self.id_procedure()),
            format!("DROP TABLE IF EXISTS {}", self.id_table()),
        ]
    }

    fn update_table_creation_code(
        &self,
        info: &EventModelInfo,
    ) -> Result<Vec<String>, TriggerError> {
        ensure_columns(info)?;
        let mut columns = vec![
            format!("{} BIGINT NOT NULL", self.quote_identifier(info.update_id_column())),
            format!("{} INT NOT NULL", self.quote_identifier(info.event_type_column())),
        ];
        for column in info.update_columns() {
            columns.push(format!(
                "{} {}",
                self.quote_identifier(&column.column_in_update_table),
                self.column_type(column.column_type)
            ));
        }
        columns.push(format!(
            "PRIMARY KEY ({})",
            self.quote_identifier(info.update_id_column())
        ));
        Ok(vec![format!(
            "CREATE TABLE {} ({}) ENGINE=InnoDB",
            self.quote_identifier(info.update_table_name()),
            columns.join(", ")
        )])
    }

    fn update_table_drop_code(&self, info: &EventModelInfo) -> Vec<String> {
        vec![format!(
            "DROP TABLE IF EXISTS {}",
            self.quote_identifier(info.update_table_name())
        )]
    }

    fn trigger_creation_code(
        &self,
        info: &EventModelInfo,
        event_type: EventType,
    ) -> Result<Vec<String>, TriggerError> {
        ensure_columns(info)?;
        let (columns, values) = insert_lists(self, info, event_type, "new_id");
        Ok(vec![format!(
            "CREATE TRIGGER {} AFTER {} ON {} FOR EACH ROW BEGIN DECLARE new_id BIGINT; CALL {}(new_id); INSERT INTO {} ({}) VALUES ({}); END",
            self.quote_identifier(&self.trigger_name(info, event_type)),
            event_type.sql_keyword(),
            self.quote_identifier(info.original_table_name()),
            self.id_procedure(),
            self.quote_identifier(info.update_table_name()),
            columns,
            values
        )])
    }

    fn trigger_drop_code(&self, info: &EventModelInfo, event_type: EventType) -> Vec<String> {
        vec![format!(
            "DROP TRIGGER IF EXISTS {}",
            self.quote_identifier(&self.trigger_name(info, event_type))
        )]
    }

    fn specific_setup_code(&self, info: &EventModelInfo) -> Vec<String> {
        vec![format!(
            "CREATE TRIGGER {} AFTER DELETE ON {} FOR EACH ROW BEGIN DELETE FROM {} WHERE `id` = OLD.{}; END",
            self.cleanup_trigger(info),
            self.quote_identifier(info.update_table_name()),
            self.id_table(),
            self.quote_identifier(info.update_id_column())
        )]
    }

    fn specific_unsetup_code(&self, info: &EventModelInfo) -> Vec<String> {
        vec![format!("DROP TRIGGER IF EXISTS {}", self.cleanup_trigger(info))]
    }
}
