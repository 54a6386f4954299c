use anyhow::Result;

use crate::attribute::ExternalAttributeMap;
use crate::event::{ChangeEvent, EventKind};
use crate::record::{build_insert_record, build_modify_record, AuditRecord};
use crate::sink::AuditSink;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub written: usize,
    pub skipped: usize,
}

/// Turn every supported event of a batch into an audit record and persist it, strictly in
/// delivery order. The first failed write aborts the batch; records already written for earlier
/// events stay in the store.
#[tracing::instrument(skip_all, fields(batch.len = events.len()), err)]
pub async fn dispatch_batch<S>(sink: &S, events: Vec<ChangeEvent>) -> Result<BatchOutcome>
where
    S: AuditSink + ?Sized,
{
    let mut outcome = BatchOutcome::default();
    for event in events {
        match build_record(&event) {
            Some(record) => {
                sink.persist(&record).await?;
                tracing::debug!(record.id = %record.id, event.kind = %event.kind, "Audit record written");
                outcome.written += 1;
            }
            None => {
                tracing::debug!(event.kind = %event.kind, "Skipping unsupported event");
                outcome.skipped += 1;
            }
        }
    }
    Ok(outcome)
}

fn build_record(event: &ChangeEvent) -> Option<AuditRecord> {
    let empty = ExternalAttributeMap::new();
    let new_image = event.new_image.as_ref().unwrap_or(&empty);
    match event.kind {
        EventKind::Insert => Some(build_insert_record(new_image)),
        EventKind::Modify => Some(build_modify_record(
            new_image,
            event.old_image.as_ref().unwrap_or(&empty),
        )),
        EventKind::Remove | EventKind::Other => None,
    }
}
