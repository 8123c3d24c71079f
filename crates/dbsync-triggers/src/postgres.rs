//! PostgreSQL trigger dialect.
//!
//! Unique log ids come from one shared sequence; `nextval` is safe under
//! concurrent writers. Triggers call a plpgsql function per (log table,
//! event type). No cleanup trigger is needed since a sequence keeps no rows.

use dbsync_model::{ColumnType, EventModelInfo};
use dbsync_types::EventType;

use crate::dialect::{ensure_columns, insert_lists, TriggerSqlDialect};
use crate::error::TriggerError;

#[derive(Debug, Clone)]
pub struct PostgresTriggerDialect {
    prefix: String,
}

impl PostgresTriggerDialect {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn sequence_name(&self) -> String {
        format!("{}unique_id_seq", self.prefix)
    }

    fn function_name(&self, info: &EventModelInfo, event_type: EventType) -> String {
        self.quote_identifier(&format!("{}_fn", self.trigger_name(info, event_type)))
    }
}

impl TriggerSqlDialect for PostgresTriggerDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn table_prefix(&self) -> &str {
        &self.prefix
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn column_type(&self, column_type: ColumnType) -> String {
        match column_type {
            ColumnType::Int => "INTEGER".to_string(),
            ColumnType::Long => "BIGINT".to_string(),
            ColumnType::Varchar(len) => format!("VARCHAR({})", len),
        }
    }

    fn setup_code(&self) -> Vec<String> {
        vec![format!(
            "CREATE SEQUENCE {}",
            self.quote_identifier(&self.sequence_name())
        )]
    }

    fn unsetup_code(&self) -> Vec<String> {
        vec![format!(
            "DROP SEQUENCE IF EXISTS {}",
            self.quote_identifier(&self.sequence_name())
        )]
    }

    fn update_table_creation_code(
        &self,
        info: &EventModelInfo,
    ) -> Result<Vec<String>, TriggerError> {
        ensure_columns(info)?;
        let mut columns = vec![
            format!(
                "{} BIGINT NOT NULL PRIMARY KEY",
                self.quote_identifier(info.update_id_column())
            ),
            format!(
                "{} INTEGER NOT NULL",
                self.quote_identifier(info.event_type_column())
            ),
        ];
        for column in info.update_columns() {
            columns.push(format!(
                "{} {}",
                self.quote_identifier(&column.column_in_update_table),
                self.column_type(column.column_type)
            ));
        }
        Ok(vec![format!(
            "CREATE TABLE {} ({})",
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
        let id_expr = format!("nextval('{}')", self.sequence_name().replace('\'', "''"));
        let (columns, values) = insert_lists(self, info, event_type, &id_expr);
        let function = self.function_name(info, event_type);
        Ok(vec![
            format!(
                "CREATE OR REPLACE FUNCTION {}() RETURNS trigger AS $$ BEGIN INSERT INTO {} ({}) VALUES ({}); RETURN NULL; END; $$ LANGUAGE plpgsql",
                function,
                self.quote_identifier(info.update_table_name()),
                columns,
                values
            ),
            format!(
                "CREATE TRIGGER {} AFTER {} ON {} FOR EACH ROW EXECUTE FUNCTION {}()",
                self.quote_identifier(&self.trigger_name(info, event_type)),
                event_type.sql_keyword(),
                self.quote_identifier(info.original_table_name()),
                function
            ),
        ])
    }

    fn trigger_drop_code(&self, info: &EventModelInfo, event_type: EventType) -> Vec<String> {
        vec![
            format!(
                "DROP TRIGGER IF EXISTS {} ON {}",
                self.quote_identifier(&self.trigger_name(info, event_type)),
                self.quote_identifier(info.original_table_name())
            ),
            format!(
                "DROP FUNCTION IF EXISTS {}()",
                self.function_name(info, event_type)
            ),
        ]
    }

    fn specific_setup_code(&self, _info: &EventModelInfo) -> Vec<String> {
        Vec::new()
    }

    fn specific_unsetup_code(&self, _info: &EventModelInfo) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbsync_model::{IdBridge, IdInfo};

    fn info() -> EventModelInfo {
        EventModelInfo::builder("place_updates", "place")
            .id_info(
                IdInfo::new(
                    "Place",
                    vec!["place_id".into()],
                    vec!["id".into()],
                    IdBridge::integer(),
                )
                .unwrap(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_setup_uses_sequence() {
        let dialect = PostgresTriggerDialect::new("dbsync_");
        assert_eq!(
            dialect.setup_code(),
            vec!["CREATE SEQUENCE \"dbsync_unique_id_seq\"".to_string()]
        );
        assert!(dialect.specific_setup_code(&info()).is_empty());
        assert!(dialect.specific_unsetup_code(&info()).is_empty());
    }

    #[test]
    fn test_update_table_creation() {
        let dialect = PostgresTriggerDialect::new("dbsync_");
        let sql = dialect.update_table_creation_code(&info()).unwrap();
        assert_eq!(
            sql[0],
            "CREATE TABLE \"place_updates\" (\"update_id\" BIGINT NOT NULL PRIMARY KEY, \
             \"event_type\" INTEGER NOT NULL, \"place_id\" BIGINT)"
        );
    }

    #[test]
    fn test_update_trigger() {
        let dialect = PostgresTriggerDialect::new("dbsync_");
        let sql = dialect
            .trigger_creation_code(&info(), EventType::Update)
            .unwrap();
        assert_eq!(sql.len(), 2);
        assert!(sql[0].starts_with("CREATE OR REPLACE FUNCTION \"dbsync_place_updates_update_fn\"()"));
        assert!(sql[0].contains("VALUES (nextval('dbsync_unique_id_seq'), 1, NEW.\"id\")"));
        assert_eq!(
            sql[1],
            "CREATE TRIGGER \"dbsync_place_updates_update\" AFTER UPDATE ON \"place\" \
             FOR EACH ROW EXECUTE FUNCTION \"dbsync_place_updates_update_fn\"()"
        );
    }

    #[test]
    fn test_delete_trigger_drop() {
        let dialect = PostgresTriggerDialect::new("dbsync_");
        let sql = dialect
            .trigger_creation_code(&info(), EventType::Delete)
            .unwrap();
        assert!(sql[0].contains("OLD.\"id\""));
        assert_eq!(
            dialect.trigger_drop_code(&info(), EventType::Delete),
            vec![
                "DROP TRIGGER IF EXISTS \"dbsync_place_updates_delete\" ON \"place\"".to_string(),
                "DROP FUNCTION IF EXISTS \"dbsync_place_updates_delete_fn\"()".to_string(),
            ]
        );
    }
}
