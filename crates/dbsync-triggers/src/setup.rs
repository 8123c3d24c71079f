//! Running generated trigger SQL against a database.

use std::sync::Arc;

use tracing::{debug, info, warn};

use dbsync_model::EventModelInfo;
use dbsync_storage::Database;
use dbsync_types::{EventType, TriggerCreationStrategy};

use crate::dialect::TriggerSqlDialect;
use crate::error::TriggerError;

/// Outcome of a setup or teardown run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupReport {
    /// Statements that succeeded
    pub executed: usize,
    /// CREATE statements that failed because the object already exists
    pub already_existing: usize,
    /// DROP statements that failed and were ignored
    pub failed_drops: usize,
}

/// Creates and drops the update-log infrastructure for a set of log tables.
#[derive(Clone)]
pub struct TriggerSetup {
    dialect: Arc<dyn TriggerSqlDialect>,
    strategy: TriggerCreationStrategy,
}

impl TriggerSetup {
    pub fn new(dialect: Arc<dyn TriggerSqlDialect>, strategy: TriggerCreationStrategy) -> Self {
        Self { dialect, strategy }
    }

    pub fn dialect(&self) -> &dyn TriggerSqlDialect {
        self.dialect.as_ref()
    }

    /// Every statement needed to create the infrastructure, in execution
    /// order: shared setup, then per log table its table, specific code and
    /// one trigger per event type.
    pub fn setup_statements(&self, infos: &[EventModelInfo]) -> Result<Vec<String>, TriggerError> {
        let mut statements = self.dialect.setup_code();
        for info in infos {
            statements.extend(self.dialect.update_table_creation_code(info)?);
            statements.extend(self.dialect.specific_setup_code(info));
            for event_type in EventType::ALL {
                statements.extend(self.dialect.trigger_creation_code(info, event_type)?);
            }
        }
        Ok(statements)
    }

    /// Statements dropping everything [`TriggerSetup::setup_statements`]
    /// creates, in reverse dependency order.
    pub fn teardown_statements(&self, infos: &[EventModelInfo]) -> Vec<String> {
        let mut statements = Vec::new();
        for info in infos.iter().rev() {
            for event_type in EventType::ALL.iter().rev() {
                statements.extend(self.dialect.trigger_drop_code(info, *event_type));
            }
            statements.extend(self.dialect.specific_unsetup_code(info));
            statements.extend(self.dialect.update_table_drop_code(info));
        }
        statements.extend(self.dialect.unsetup_code());
        statements
    }

    /// Create the infrastructure according to the configured strategy.
    pub async fn apply(
        &self,
        db: &dyn Database,
        infos: &[EventModelInfo],
    ) -> Result<SetupReport, TriggerError> {
        let mut report = SetupReport::default();
        match self.strategy {
            TriggerCreationStrategy::None => {
                info!("Trigger creation disabled, skipping setup");
                return Ok(report);
            }
            TriggerCreationStrategy::DropCreate => {
                self.run_drops(db, infos, &mut report).await;
            }
            TriggerCreationStrategy::Create => {}
        }

        let statements = self.setup_statements(infos)?;
        for sql in statements {
            match db.execute_ddl(&sql).await {
                Ok(()) => {
                    debug!(sql = %sql, "Executed setup statement");
                    report.executed += 1;
                }
                Err(e) if e.is_already_exists() => {
                    warn!(sql = %sql, error = %e, "Object already exists, continuing");
                    report.already_existing += 1;
                }
                Err(source) => return Err(TriggerError::Statement { sql, source }),
            }
        }

        info!(
            dialect = self.dialect.name(),
            tables = infos.len(),
            executed = report.executed,
            already_existing = report.already_existing,
            "Trigger setup complete"
        );
        Ok(report)
    }

    /// Drop the infrastructure. Failures are logged and counted, never
    /// returned, so a partial previous setup can always be cleaned.
    pub async fn teardown(&self, db: &dyn Database, infos: &[EventModelInfo]) -> SetupReport {
        let mut report = SetupReport::default();
        self.run_drops(db, infos, &mut report).await;
        info!(
            dialect = self.dialect.name(),
            executed = report.executed,
            failed = report.failed_drops,
            "Trigger teardown complete"
        );
        report
    }

    async fn run_drops(&self, db: &dyn Database, infos: &[EventModelInfo], report: &mut SetupReport) {
        for sql in self.teardown_statements(infos) {
            match db.execute_ddl(&sql).await {
                Ok(()) => report.executed += 1,
                Err(e) => {
                    warn!(sql = %sql, error = %e, "Drop statement failed, ignoring");
                    report.failed_drops += 1;
                }
            }
        }
    }
}
