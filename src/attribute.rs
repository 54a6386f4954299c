use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type ExternalAttributeMap = HashMap<String, ExternalAttributeValue>;
pub type AttributeMap = HashMap<String, AttributeValue>;

/// A field value as it arrives on the change stream. The source store does not enforce that
/// exactly one member is set, so every member is optional and any combination may show up.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ExternalAttributeValue {
    #[serde(rename = "S", default, skip_serializing_if = "Option::is_none")]
    pub s: Option<String>,
    #[serde(rename = "N", default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(rename = "BOOL", default, skip_serializing_if = "Option::is_none")]
    pub bool: Option<bool>,
    #[serde(rename = "L", default, skip_serializing_if = "Option::is_none")]
    pub l: Option<Vec<ExternalAttributeValue>>,
    #[serde(rename = "M", default, skip_serializing_if = "Option::is_none")]
    pub m: Option<ExternalAttributeMap>,
}

/// Canonical attribute value written to the audit store. Serializes to the same single-key
/// tagged shape the stream uses, e.g. `{"S": "hello"}` or `{"M": {"n": {"N": "1"}}}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    String(String),
    #[serde(rename = "N")]
    Number(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "L")]
    List(Vec<AttributeValue>),
    #[serde(rename = "M")]
    Map(AttributeMap),
}

impl AttributeValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }
}

/// Convert a whole image from the stream into canonical form. Fields whose node has no
/// recognized member are left out of the result rather than failing the conversion.
///
/// The conversion is lossy for lists: every element is read as a string, and a number, bool,
/// list or map element comes out as an empty string indistinguishable from a real `""`.
pub fn normalize(raw: &ExternalAttributeMap) -> AttributeMap {
    raw.iter()
        .filter_map(|(name, node)| Some((name.clone(), normalize_value(node)?)))
        .collect()
}

/// Convert a single node. Members are checked in the order S, N, BOOL, L, M and the first one
/// present wins, so a node carrying several members keeps only the highest ranked.
///
/// Nested maps recurse, so stack depth grows with the nesting depth of the input.
pub fn normalize_value(node: &ExternalAttributeValue) -> Option<AttributeValue> {
    node.s
        .clone()
        .map(AttributeValue::String)
        .or_else(|| node.n.clone().map(AttributeValue::Number))
        .or_else(|| node.bool.map(AttributeValue::Bool))
        .or_else(|| node.l.as_deref().map(normalize_list))
        .or_else(|| node.m.as_ref().map(|map| AttributeValue::Map(normalize(map))))
}

// List elements are always read as strings. Elements without an S member become empty strings
// so the list keeps its length; their value and type are lost.
fn normalize_list(items: &[ExternalAttributeValue]) -> AttributeValue {
    AttributeValue::List(
        items
            .iter()
            .map(|item| AttributeValue::String(item.s.clone().unwrap_or_default()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn external(value: serde_json::Value) -> ExternalAttributeMap {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_scalars_are_preserved_verbatim() {
        let normalized = normalize(&external(json!({
            "name": {"S": "timeout"},
            "value": {"N": "10.50"},
            "enabled": {"BOOL": false}
        })));

        assert_eq!(normalized.len(), 3);
        assert_eq!(normalized["name"], AttributeValue::string("timeout"));
        assert_eq!(normalized["value"], AttributeValue::Number("10.50".to_string()));
        assert_eq!(normalized["enabled"], AttributeValue::Bool(false));
    }

    #[test]
    fn test_first_populated_member_wins() {
        let node = ExternalAttributeValue {
            n: Some("7".to_string()),
            bool: Some(true),
            m: Some(HashMap::new()),
            ..Default::default()
        };
        assert_eq!(
            normalize_value(&node),
            Some(AttributeValue::Number("7".to_string()))
        );

        let node = ExternalAttributeValue {
            s: Some("text".to_string()),
            n: Some("7".to_string()),
            ..Default::default()
        };
        assert_eq!(normalize_value(&node), Some(AttributeValue::string("text")));
    }

    #[test]
    fn test_empty_node_is_dropped() {
        let normalized = normalize(&external(json!({
            "key": {"S": "k1"},
            "nothing": {},
            "unsupported": {"NULL": true}
        })));

        assert_eq!(normalized.len(), 1);
        assert!(normalized.contains_key("key"));
        assert!(!normalized.contains_key("nothing"));
        assert!(!normalized.contains_key("unsupported"));
    }

    #[test]
    fn test_list_elements_are_read_as_strings() {
        let normalized = normalize(&external(json!({
            "tags": {"L": [{"S": "a"}, {"N": "2"}, {"BOOL": true}, {"S": "d"}]}
        })));

        assert_eq!(
            normalized["tags"],
            AttributeValue::List(vec![
                AttributeValue::string("a"),
                AttributeValue::string(""),
                AttributeValue::string(""),
                AttributeValue::string("d"),
            ])
        );
    }

    #[test]
    fn test_nested_list_elements_lose_their_content() {
        let normalized = normalize(&external(json!({
            "matrix": {"L": [{"L": [{"S": "a"}]}, {"M": {"k": {"S": "v"}}}, {"S": ""}]}
        })));

        assert_eq!(
            normalized["matrix"],
            AttributeValue::List(vec![
                AttributeValue::string(""),
                AttributeValue::string(""),
                AttributeValue::string(""),
            ])
        );
    }

    #[test]
    fn test_nested_maps_keep_their_shape() {
        let normalized = normalize(&external(json!({
            "outer": {"M": {
                "count": {"N": "3"},
                "inner": {"M": {
                    "flag": {"BOOL": true},
                    "deepest": {"M": {"name": {"S": "leaf"}}}
                }}
            }}
        })));

        let outer = match &normalized["outer"] {
            AttributeValue::Map(map) => map,
            other => panic!("expected map, got {other:?}"),
        };
        assert_eq!(outer.len(), 2);
        assert_eq!(outer["count"], AttributeValue::Number("3".to_string()));

        let inner = match &outer["inner"] {
            AttributeValue::Map(map) => map,
            other => panic!("expected map, got {other:?}"),
        };
        assert_eq!(inner["flag"], AttributeValue::Bool(true));

        let mut deepest = HashMap::new();
        deepest.insert("name".to_string(), AttributeValue::string("leaf"));
        assert_eq!(inner["deepest"], AttributeValue::Map(deepest));
    }

    #[test]
    fn test_deep_nesting_terminates() {
        let mut node = ExternalAttributeValue {
            s: Some("bottom".to_string()),
            ..Default::default()
        };
        for _ in 0..200 {
            let mut map = HashMap::new();
            map.insert("child".to_string(), node);
            node = ExternalAttributeValue {
                m: Some(map),
                ..Default::default()
            };
        }

        let mut current = normalize_value(&node).unwrap();
        let mut depth = 0;
        while let AttributeValue::Map(mut map) = current {
            current = map.remove("child").unwrap();
            depth += 1;
        }
        assert_eq!(depth, 200);
        assert_eq!(current, AttributeValue::string("bottom"));
    }

    #[test]
    fn test_serialized_shape_matches_stream_tags() {
        let mut map = HashMap::new();
        map.insert("n".to_string(), AttributeValue::Number("1".to_string()));
        let value = AttributeValue::List(vec![AttributeValue::string("x")]);

        assert_eq!(
            serde_json::to_value(AttributeValue::Map(map)).unwrap(),
            json!({"M": {"n": {"N": "1"}}})
        );
        assert_eq!(serde_json::to_value(value).unwrap(), json!({"L": [{"S": "x"}]}));
        assert_eq!(
            serde_json::to_value(AttributeValue::Bool(true)).unwrap(),
            json!({"BOOL": true})
        );
    }
}
