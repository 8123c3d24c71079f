//! Update source configuration.

use std::time::Duration;

use dbsync_types::Settings;

use crate::error::SourceError;

/// Polling and batching parameters of an [`crate::UpdateSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// Delay between the end of one tick and the start of the next
    pub poll_interval: Duration,
    /// Change events handed to consumers per call
    pub delivery_batch_size: usize,
    /// Log rows fetched per page, independent of the delivery batch size
    pub page_size: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            delivery_batch_size: 5,
            page_size: 100,
        }
    }
}

impl SourceConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            delivery_batch_size: settings.delivery_batch_size,
            page_size: settings.page_size,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_delivery_batch_size(mut self, size: usize) -> Self {
        self.delivery_batch_size = size;
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    pub fn validate(&self) -> Result<(), SourceError> {
        if self.delivery_batch_size == 0 {
            return Err(SourceError::Config(
                "delivery_batch_size must be positive".into(),
            ));
        }
        if self.page_size == 0 {
            return Err(SourceError::Config("page_size must be positive".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(SourceError::Config("poll_interval must be positive".into()));
        }
        Ok(())
    }
}
