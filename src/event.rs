use serde::{Deserialize, Serialize};

use crate::attribute::ExternalAttributeMap;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Insert,
    Modify,
    Remove,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Insert => write!(f, "INSERT"),
            EventKind::Modify => write!(f, "MODIFY"),
            EventKind::Remove => write!(f, "REMOVE"),
            EventKind::Other => write!(f, "OTHER"),
        }
    }
}

/// One entry of a delivered batch, describing a single mutation of a configuration item.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    #[serde(rename = "eventName")]
    pub kind: EventKind,
    #[serde(default)]
    pub new_image: Option<ExternalAttributeMap>,
    #[serde(default)]
    pub old_image: Option<ExternalAttributeMap>,
}
