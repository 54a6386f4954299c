use anyhow::Result;
use async_trait::async_trait;
use bb8_redis::{bb8::Pool, RedisConnectionManager};
use futures::Future;
use redis::{
    streams::{StreamId, StreamReadOptions, StreamReadReply},
    AsyncCommands, Client, FromRedisValue, RedisError,
};
use uuid::Uuid;

use crate::config::Settings;
use crate::consumer::ChangeSource;
use crate::event::ChangeEvent;
use crate::record::AuditRecord;
use crate::sink::AuditSink;

/// One entry read from the change stream. `event` is `None` when the entry could not be decoded;
/// the entry still counts towards the cursor so it is not read again.
#[derive(Debug, Clone)]
pub struct ChangeEntry {
    pub version: String,
    pub event: Option<ChangeEvent>,
}

/// Handle on every Redis interaction of the service: reading the configuration change stream,
/// keeping the stream cursor, and writing audit records. Cloning is cheap and shares the pool.
#[derive(Clone)]
pub struct Repository {
    pool: Pool<RedisConnectionManager>,
    target_table: String,
    source_stream: String,
}

impl Repository {
    #[tracing::instrument(skip_all, err)]
    pub async fn new(client: Client, settings: &Settings) -> Result<Self> {
        let manager = RedisConnectionManager::new(client.get_connection_info().clone())?;
        let pool = Pool::builder().max_size(5).build(manager).await?;
        Ok(Self {
            pool,
            target_table: settings.target_table.clone(),
            source_stream: settings.source_stream.clone(),
        })
    }

    /// Read up to `count` change entries that follow `version` on the source stream, blocking for
    /// at most `block_ms`. An empty result only means nothing arrived within the block window.
    #[tracing::instrument(skip(self), err)]
    pub async fn get_change_batch(
        &self,
        count: usize,
        version: &str,
        block_ms: usize,
    ) -> Result<Vec<ChangeEntry>> {
        Self::with_redis_retry(|| async {
            let mut connection = self.pool.get().await?;

            let read_reply = connection
                .xread_options::<_, _, StreamReadReply>(
                    &[self.source_stream.as_str()],
                    &[version],
                    &StreamReadOptions::default().block(block_ms).count(count),
                )
                .await?;

            // Only one stream key was requested, so at most one set of entries comes back
            let entries = read_reply
                .keys
                .into_iter()
                .next()
                .into_iter()
                .flat_map(|key| key.ids)
                .map(Self::decode_change_entry)
                .collect::<Vec<_>>();

            Ok(entries)
        })
        .await
    }

    /// Stream entry ID of the last change that was fully audited, or `0` before the first batch
    #[tracing::instrument(skip(self), err)]
    pub async fn get_cursor(&self) -> Result<String> {
        Self::with_redis_retry(|| async {
            let mut connection = self.pool.get().await?;
            let version = connection
                .get::<_, Option<String>>(self.cursor_key())
                .await?
                .unwrap_or_else(|| "0".to_string());
            Ok(version)
        })
        .await
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn set_cursor(&self, version: &str) -> Result<()> {
        Self::with_redis_retry(|| async {
            let mut connection = self.pool.get().await?;
            connection
                .set::<_, _, ()>(self.cursor_key(), version)
                .await?;
            Ok(())
        })
        .await
    }

    /// Write one audit record as a single SET keyed by its own ID. Not retried: a failed write has
    /// to reach the caller so the batch is aborted.
    #[tracing::instrument(skip_all, fields(record.id = %record.id), err)]
    pub async fn put_audit_record(&self, record: &AuditRecord) -> Result<()> {
        let mut connection = self.pool.get().await?;
        connection
            .set::<_, _, ()>(
                Self::audit_record_key(&self.target_table, &record.id),
                serde_json::to_string(record)?,
            )
            .await?;
        Ok(())
    }

    // ---- Private helpers

    fn decode_change_entry(entry: StreamId) -> ChangeEntry {
        let event = match entry.map.get("event") {
            None => {
                tracing::warn!(entry.id = %entry.id, "Change entry has no event field");
                None
            }
            Some(value) => Self::decode_change_event(value)
                .map_err(|error| {
                    tracing::warn!(entry.id = %entry.id, %error, "Could not decode change event")
                })
                .ok(),
        };

        ChangeEntry {
            version: entry.id,
            event,
        }
    }

    fn decode_change_event(value: &redis::Value) -> Result<ChangeEvent> {
        let string = String::from_redis_value(value)?;
        Ok(serde_json::from_str::<ChangeEvent>(&string)?)
    }

    fn audit_record_key(target_table: &str, id: &Uuid) -> String {
        format!("{target_table}/{id}")
    }

    fn cursor_key(&self) -> String {
        format!("{}/cursor", self.source_stream)
    }

    /// Retry an action a few times when Redis reports an error that is usually transient.
    /// Anything else, and any non-Redis error, is returned straight away.
    async fn with_redis_retry<F, T, O>(mut action: F) -> Result<T>
    where
        F: FnMut() -> O,
        O: Future<Output = Result<T>>,
    {
        let mut retries = 5;
        loop {
            match action().await {
                Ok(ret) => return Ok(ret),
                Err(error) => {
                    match error.downcast_ref::<RedisError>() {
                        None => return Err(error),
                        Some(redis_error) if Self::is_transient(redis_error) => {}
                        Some(_) => return Err(error),
                    }

                    retries -= 1;
                    if retries == 0 {
                        return Err(error);
                    }
                    tracing::debug!(%error, retries, "Retrying Redis call");
                }
            }
        }
    }

    fn is_transient(error: &RedisError) -> bool {
        matches!(
            error.kind(),
            redis::ErrorKind::TypeError
                | redis::ErrorKind::TryAgain
                | redis::ErrorKind::ResponseError
        ) || error.is_timeout()
            || error.is_connection_dropped()
    }
}

#[async_trait]
impl AuditSink for Repository {
    async fn persist(&self, record: &AuditRecord) -> Result<()> {
        self.put_audit_record(record).await
    }
}

#[async_trait]
impl ChangeSource for Repository {
    async fn read_changes(
        &self,
        count: usize,
        version: &str,
        block_ms: usize,
    ) -> Result<Vec<ChangeEntry>> {
        self.get_change_batch(count, version, block_ms).await
    }

    async fn load_cursor(&self) -> Result<String> {
        self.get_cursor().await
    }

    async fn save_cursor(&self, version: &str) -> Result<()> {
        self.set_cursor(version).await
    }
}
