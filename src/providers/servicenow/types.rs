use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A reference field returned with `sysparm_display_value=true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedValue {
    /// Human-readable form of the reference
    pub display_value: Value,
    /// Raw internal value, when the API includes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// REST link to the referenced record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// One field of a change record: either a reference carrying a display
/// form, or a plain value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Linked(LinkedValue),
    Scalar(Value),
}

impl FieldValue {
    /// Collapse the field to the value that gets indexed.
    pub fn flatten(self) -> Value {
        match self {
            Self::Linked(linked) => linked.display_value,
            Self::Scalar(value) => value,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Scalar(Value::String(value.to_string()))
    }
}

/// A change request as returned by the table API, in field order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawChangeRecord(pub IndexMap<String, FieldValue>);

impl RawChangeRecord {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for RawChangeRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Body of a table API response.
#[derive(Debug, Deserialize)]
pub(super) struct ChangeResponse {
    #[serde(default)]
    pub result: Vec<RawChangeRecord>,
}
