use anyhow::Result;
use async_trait::async_trait;

use crate::config::Settings;
use crate::dispatcher::dispatch_batch;
use crate::event::ChangeEvent;
use crate::repository::ChangeEntry;
use crate::sink::AuditSink;

/// Where the consumer reads changes from and keeps its position. The same store also receives
/// the audit records.
#[async_trait]
pub trait ChangeSource: AuditSink {
    /// Up to `count` entries following `version`; empty when nothing arrived within `block_ms`
    async fn read_changes(
        &self,
        count: usize,
        version: &str,
        block_ms: usize,
    ) -> Result<Vec<ChangeEntry>>;

    /// Version of the last fully audited entry, `0` before the first batch
    async fn load_cursor(&self) -> Result<String>;

    async fn save_cursor(&self, version: &str) -> Result<()>;
}

/// Feeds batches from the configuration change stream into the dispatcher. The cursor only moves
/// once a whole batch has been audited, so a failed batch is read again from the same position
/// and events before the failure get audited a second time.
pub struct ChangeConsumer<S> {
    source: S,
    batch_size: usize,
    poll_block_ms: usize,
    retry_delay: std::time::Duration,
}

impl<S: ChangeSource> ChangeConsumer<S> {
    #[tracing::instrument(skip_all)]
    pub fn new(source: S, settings: &Settings) -> Self {
        Self {
            source,
            batch_size: settings.batch_size,
            poll_block_ms: settings.poll_block_ms,
            retry_delay: settings.retry_delay,
        }
    }

    #[tracing::instrument(skip_all)]
    pub async fn start(self) {
        loop {
            if self.run().await.is_err() {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
    }

    #[tracing::instrument(skip_all, err)]
    async fn run(&self) -> Result<()> {
        let mut version = self.source.load_cursor().await?;
        loop {
            version = self.audit_next_batch(version).await?;
        }
    }

    /// Audit the batch that follows `version` and return the version to continue from. The
    /// cursor is saved only after every event of the batch was written; on error it stays put.
    #[tracing::instrument(skip(self), err)]
    async fn audit_next_batch(&self, version: String) -> Result<String> {
        let entries = self
            .source
            .read_changes(self.batch_size, &version, self.poll_block_ms)
            .await?;

        let next_version = match entries.last() {
            Some(entry) => entry.version.clone(),
            None => return Ok(version),
        };

        let outcome = dispatch_batch(&self.source, decoded_events(entries)).await?;
        tracing::info!(
            written = outcome.written,
            skipped = outcome.skipped,
            version = %next_version,
            "Batch audited"
        );

        self.source.save_cursor(&next_version).await?;
        Ok(next_version)
    }
}

// Entries that failed to decode were already reported when they were read
fn decoded_events(entries: Vec<ChangeEntry>) -> Vec<ChangeEvent> {
    entries
        .into_iter()
        .filter_map(|entry| entry.event)
        .collect()
}
