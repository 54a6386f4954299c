use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::attribute::{normalize, AttributeMap, AttributeValue, ExternalAttributeMap};

/// Stand-in item key for images that carry no `key` attribute
pub const UNKNOWN_KEY: &str = "UNKNOWN_KEY";

/// The only attribute whose before/after values are captured for modifications
pub const TRACKED_ATTRIBUTE: &str = "value";

const KEY_ATTRIBUTE: &str = "key";

/// One durable entry in the audit store. Field names match the stored item, so serializing this
/// struct produces exactly what gets written.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: Uuid,
    pub item_key: AttributeValue,
    pub modification_time: String,
    #[serde(flatten)]
    pub payload: AuditPayload,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum AuditPayload {
    #[serde(rename_all = "camelCase")]
    Modify {
        updated_attribute: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_value: Option<AttributeValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_value: Option<AttributeValue>,
    },
    #[serde(rename_all = "camelCase")]
    Insert { new_value: AttributeValue },
}

/// Build the audit record for a newly inserted item. The `key` and `value` attributes are copied
/// into a nested map; whichever of them the image lacks is simply missing from that map.
#[tracing::instrument(skip_all)]
pub fn build_insert_record(new_image: &ExternalAttributeMap) -> AuditRecord {
    let mut new_item = normalize(new_image);

    let item_key = item_key(&new_item);
    let new_value = [KEY_ATTRIBUTE, TRACKED_ATTRIBUTE]
        .into_iter()
        .filter_map(|name| Some((name.to_string(), new_item.remove(name)?)))
        .collect::<HashMap<_, _>>();

    AuditRecord {
        id: new_record_id(),
        item_key,
        modification_time: processing_time(),
        payload: AuditPayload::Insert {
            new_value: AttributeValue::Map(new_value),
        },
    }
}

/// Build the audit record for a modified item. Only the tracked `value` attribute is compared,
/// whatever else changed in the same event is not represented.
#[tracing::instrument(skip_all)]
pub fn build_modify_record(
    new_image: &ExternalAttributeMap,
    old_image: &ExternalAttributeMap,
) -> AuditRecord {
    let mut new_item = normalize(new_image);
    let mut old_item = normalize(old_image);

    AuditRecord {
        id: new_record_id(),
        item_key: item_key(&new_item),
        modification_time: processing_time(),
        payload: AuditPayload::Modify {
            updated_attribute: TRACKED_ATTRIBUTE.to_string(),
            old_value: old_item.remove(TRACKED_ATTRIBUTE),
            new_value: new_item.remove(TRACKED_ATTRIBUTE),
        },
    }
}

fn item_key(item: &AttributeMap) -> AttributeValue {
    item.get(KEY_ATTRIBUTE)
        .cloned()
        .unwrap_or_else(|| AttributeValue::string(UNKNOWN_KEY))
}

// Ids are random per build, so the same event delivered twice yields two distinct records.
fn new_record_id() -> Uuid {
    Uuid::new_v4()
}

// Fixed-width UTC timestamps sort the same lexicographically and chronologically
fn processing_time() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
