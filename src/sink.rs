use anyhow::Result;
use async_trait::async_trait;

use crate::record::AuditRecord;

/// Durable destination for audit records. One call is one independent write; implementations
/// must not buffer, and must surface every store failure to the caller.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn persist(&self, record: &AuditRecord) -> Result<()>;
}
