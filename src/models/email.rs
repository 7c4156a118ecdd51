use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A field that is a bare string for one value and a list otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    /// Appends a value, promoting a single value to a list.
    pub fn push(&mut self, value: String) {
        match self {
            OneOrMany::One(existing) => {
                let first = std::mem::take(existing);
                *self = OneOrMany::Many(vec![first, value]);
            }
            OneOrMany::Many(values) => values.push(value),
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            OneOrMany::One(value) => vec![value.as_str()],
            OneOrMany::Many(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

/// Decoded message handed back to callers.
///
/// Timestamp pairs (`date`/`date_timestamp`, `internal_date`/`internal_date_timestamp`)
/// are always both set or both unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<OneOrMany>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bcc: Option<Vec<String>>,
    /// Sender-stated date, RFC 3339.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_timestamp: Option<i64>,
    /// Server arrival time, RFC 3339.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_date_timestamp: Option<i64>,
    /// Missing means the message had no text section, not a failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, OneOrMany>>,
    /// Transport sequence number; serialized as `uid` for existing consumers.
    #[serde(rename = "uid")]
    pub seq: u32,
}

impl EmailRecord {
    pub fn to_json(&self) -> serde_json::Value {
        // Serializing plain strings/maps cannot fail
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn header(&self, name: &str) -> Option<&OneOrMany> {
        self.headers
            .as_ref()
            .and_then(|headers| headers.get(&name.to_ascii_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn one_or_many_promotes_on_push() {
        let mut value = OneOrMany::One("a".into());
        value.push("b".into());
        assert_eq!(value, OneOrMany::Many(vec!["a".into(), "b".into()]));
        value.push("c".into());
        assert_eq!(value.values(), vec!["a", "b", "c"]);
    }

    #[test]
    fn absent_fields_are_omitted_from_json() {
        let record = EmailRecord {
            subject: Some("Hi".into()),
            from: Some(OneOrMany::One("a@b".into())),
            seq: 9,
            ..Default::default()
        };
        assert_eq!(record.to_json(), json!({ "subject": "Hi", "from": "a@b", "uid": 9 }));
    }

    #[test]
    fn timestamps_use_camel_case_keys() {
        let record = EmailRecord {
            internal_date: Some("2024-01-01T00:00:00Z".into()),
            internal_date_timestamp: Some(1_704_067_200),
            seq: 1,
            ..Default::default()
        };
        let value = record.to_json();
        assert_eq!(value["internalDate"], "2024-01-01T00:00:00Z");
        assert_eq!(value["internalDateTimestamp"], 1_704_067_200);
    }
}
