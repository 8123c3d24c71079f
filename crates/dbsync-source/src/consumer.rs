//! Consumer trait for ordered change event batches.

use async_trait::async_trait;

use dbsync_types::ChangeEvent;

use crate::error::ConsumerError;

/// Receives batches of change events from an [`crate::UpdateSource`].
///
/// Batches arrive in merged log order. A batch may be delivered again after
/// a failed tick, so applying it must be idempotent. Returning an error
/// aborts the tick and keeps every log row of the batch for redelivery.
#[async_trait]
pub trait UpdateConsumer: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    async fn update_event(&self, events: &[ChangeEvent]) -> Result<(), ConsumerError>;
}
