use anyhow::{anyhow, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Process-wide settings, read once at startup. A missing or malformed value is a deployment
/// problem and stops the service before it touches the change stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub redis_url: String,
    /// Key prefix of the audit store; records live at `{target_table}/{id}`
    pub target_table: String,
    pub source_stream: String,
    pub batch_size: usize,
    pub poll_block_ms: usize,
    pub retry_delay: Duration,
}

impl Settings {
    #[tracing::instrument(err)]
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| anyhow!("{name} is required"))
        };

        let batch_size = Self::parse_or(&lookup, "BATCH_SIZE", 1)?;
        if batch_size == 0 {
            return Err(anyhow!("BATCH_SIZE must be at least 1"));
        }

        Ok(Self {
            redis_url: required("REDIS_URL")?,
            target_table: required("TARGET_TABLE")?,
            source_stream: lookup("SOURCE_STREAM")
                .unwrap_or_else(|| "configuration/changes".to_string()),
            batch_size,
            poll_block_ms: Self::parse_or(&lookup, "POLL_BLOCK_MS", 1000)?,
            retry_delay: Duration::from_millis(Self::parse_or(&lookup, "RETRY_DELAY_MS", 5000)?),
        })
    }

    fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
    where
        F: Fn(&str) -> Option<String>,
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match lookup(name) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse::<T>()
                .with_context(|| format!("{name} has an invalid value: {value:?}")),
        }
    }
}
