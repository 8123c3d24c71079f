//! Connection and transaction traits consumed by the update source and the
//! trigger setup.

use async_trait::async_trait;

use dbsync_types::{ColumnValue, Row};

use crate::error::StorageError;

/// A relational database holding the original and update-log tables.
#[async_trait]
pub trait Database: Send + Sync {
    /// Whether a connection can currently be acquired. A poller skips its
    /// tick when this is false.
    async fn is_available(&self) -> bool;

    /// Begin a transaction.
    async fn begin(&self) -> Result<Box<dyn Transaction>, StorageError>;

    /// Execute one DDL statement outside any transaction.
    async fn execute_ddl(&self, sql: &str) -> Result<(), StorageError>;
}

/// A transaction scoped to one poller tick.
#[async_trait]
pub trait Transaction: Send {
    /// Number of rows currently in `table`.
    async fn count_rows(&mut self, table: &str) -> Result<u64, StorageError>;

    /// Rows of `table` ordered ascending by `order_column`, skipping
    /// `offset` rows and returning at most `limit`.
    async fn fetch_page(
        &mut self,
        table: &str,
        order_column: &str,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<Row>, StorageError>;

    /// Delete the rows of `table` whose `id_column` is one of `ids`.
    /// Returns the number of deleted rows.
    async fn delete_rows(
        &mut self,
        table: &str,
        id_column: &str,
        ids: &[ColumnValue],
    ) -> Result<u64, StorageError>;

    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}
