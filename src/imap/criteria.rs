//! Translation of loosely-typed header filters into IMAP SEARCH criteria.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::debug;
use serde_json::{Map, Value};

use crate::imap::error::ImapError;

/// Header name -> accepted values. A message matches a key when the header
/// contains at least one of the values; every key must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFilter {
    headers: BTreeMap<String, Vec<String>>,
}

impl HeaderFilter {
    /// Lenient translation.
    ///
    /// Strings become one-element lists, arrays keep their string elements in
    /// order, and anything else is dropped without error. Keys left with no
    /// values are omitted.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self::from_map(map),
            other => {
                debug!("Ignoring non-object header filter: {}", other);
                Self::default()
            }
        }
    }

    pub fn from_map(map: &Map<String, Value>) -> Self {
        let mut headers = BTreeMap::new();
        for (key, value) in map {
            let values: Vec<String> = match value {
                Value::String(s) => vec![s.clone()],
                Value::Array(items) => items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect(),
                other => {
                    debug!("Ignoring header filter value for '{}': {}", key, other);
                    Vec::new()
                }
            };
            if !values.is_empty() {
                headers.insert(key.clone(), values);
            }
        }
        Self { headers }
    }

    /// Strict translation: rejects anything that is not a string or an array of strings.
    pub fn try_from_json(value: &Value) -> Result<Self, ImapError> {
        let map = value.as_object().ok_or_else(|| {
            ImapError::InvalidCriteria("header filter must be an object".to_string())
        })?;

        let mut headers = BTreeMap::new();
        for (key, value) in map {
            let values = match value {
                Value::String(s) => vec![s.clone()],
                Value::Array(items) => items
                    .iter()
                    .map(|item| {
                        item.as_str().map(str::to_string).ok_or_else(|| {
                            ImapError::InvalidCriteria(format!(
                                "header '{}' contains a non-string value: {}",
                                key, item
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                other => {
                    return Err(ImapError::InvalidCriteria(format!(
                        "header '{}' must be a string or a list of strings, got {}",
                        key, other
                    )))
                }
            };
            if values.is_empty() {
                return Err(ImapError::InvalidCriteria(format!(
                    "header '{}' has no values",
                    key
                )));
            }
            check_quotable(key, key)?;
            for value in &values {
                check_quotable(key, value)?;
            }
            headers.insert(key.clone(), values);
        }
        Ok(Self { headers })
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.headers.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.headers.iter()
    }
}

/// Criteria for one SEARCH command. Built fresh per search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    pub header: HeaderFilter,
    /// Internal date on or after this instant's day.
    pub since: Option<DateTime<Utc>>,
    /// Internal date before this instant's day.
    pub before: Option<DateTime<Utc>>,
}

impl SearchCriteria {
    pub fn with_header(header: HeaderFilter) -> Self {
        Self {
            header,
            ..Default::default()
        }
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn before(mut self, before: DateTime<Utc>) -> Self {
        self.before = Some(before);
        self
    }

    /// Renders the SEARCH arguments, e.g. `HEADER "Subject" "hello" SINCE 1-Feb-2024`.
    ///
    /// Names and values travel as quoted strings on the command line, so any
    /// control character (CR and LF included) is rejected with
    /// [`ImapError::InvalidCriteria`]. Non-ASCII values are sent as 8-bit quoted
    /// strings after `CHARSET UTF-8`; most servers accept that, but a strict
    /// RFC 3501 server may answer BAD since `quoted` is 7-bit only.
    pub fn to_imap_query(&self) -> Result<String, ImapError> {
        let mut keys: Vec<String> = Vec::new();

        for (name, values) in self.header.iter() {
            check_quotable(name, name)?;
            let mut terms = Vec::with_capacity(values.len());
            for value in values {
                check_quotable(name, value)?;
                terms.push(format!("HEADER {} {}", quote(name), quote(value)));
            }
            // Fold alternatives into nested ORs: OR a OR b c
            let mut terms = terms.into_iter();
            if let Some(first) = terms.next() {
                keys.push(or_chain(first, terms.collect()));
            }
        }

        if let Some(since) = self.since {
            keys.push(format!("SINCE {}", imap_date(&since)));
        }
        if let Some(before) = self.before {
            keys.push(format!("BEFORE {}", imap_date(&before)));
        }

        if keys.is_empty() {
            return Ok("ALL".to_string());
        }

        let query = keys.join(" ");
        if self.needs_utf8() {
            Ok(format!("CHARSET UTF-8 {}", query))
        } else {
            Ok(query)
        }
    }

    fn needs_utf8(&self) -> bool {
        self.header
            .iter()
            .any(|(name, values)| !name.is_ascii() || values.iter().any(|v| !v.is_ascii()))
    }
}

fn or_chain(first: String, rest: Vec<String>) -> String {
    let mut all = Vec::with_capacity(rest.len() + 1);
    all.push(first);
    all.extend(rest);

    let mut iter = all.into_iter().rev();
    // `all` has at least one element
    let mut acc = iter.next().unwrap_or_default();
    for term in iter {
        acc = format!("OR {} {}", term, acc);
    }
    acc
}

fn check_quotable(header: &str, s: &str) -> Result<(), ImapError> {
    if s.chars().any(char::is_control) {
        return Err(ImapError::InvalidCriteria(format!(
            "header '{}' filter contains a control character",
            header.escape_default()
        )));
    }
    Ok(())
}

fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// IMAP `date` production: `d-Mon-yyyy`.
fn imap_date(at: &DateTime<Utc>) -> String {
    at.format("%-d-%b-%Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn scalars_become_single_element_lists() {
        let filter = HeaderFilter::from_json(&json!({ "Subject": "hello" }));
        assert_eq!(filter.get("Subject"), Some(&["hello".to_string()][..]));
    }

    #[test]
    fn lists_keep_only_strings_in_order() {
        let filter = HeaderFilter::from_json(&json!({ "X-Tag": ["b", 1, "a", null, true, "c"] }));
        assert_eq!(
            filter.get("X-Tag"),
            Some(&["b".to_string(), "a".to_string(), "c".to_string()][..])
        );
    }

    #[test]
    fn keys_without_string_values_are_dropped() {
        let filter = HeaderFilter::from_json(&json!({
            "A": 42,
            "B": [1, 2],
            "C": [],
            "D": { "nested": "x" },
            "E": "kept",
        }));
        assert_eq!(filter.len(), 1);
        assert!(filter.get("A").is_none());
        assert!(filter.get("B").is_none());
        assert!(filter.get("C").is_none());
        assert!(filter.get("D").is_none());
        assert!(filter.iter().all(|(_, values)| !values.is_empty()));
    }

    #[test]
    fn non_object_input_yields_empty_filter() {
        assert!(HeaderFilter::from_json(&json!("Subject")).is_empty());
        assert!(HeaderFilter::from_json(&Value::Null).is_empty());
    }

    #[test]
    fn strict_translation_rejects_malformed_values() {
        assert!(HeaderFilter::try_from_json(&json!({ "Subject": "ok", "To": ["a@b"] })).is_ok());
        assert!(matches!(
            HeaderFilter::try_from_json(&json!({ "Subject": 3 })),
            Err(ImapError::InvalidCriteria(_))
        ));
        assert!(matches!(
            HeaderFilter::try_from_json(&json!({ "To": ["a@b", false] })),
            Err(ImapError::InvalidCriteria(_))
        ));
        assert!(matches!(
            HeaderFilter::try_from_json(&json!({ "To": [] })),
            Err(ImapError::InvalidCriteria(_))
        ));
        assert!(HeaderFilter::try_from_json(&json!([1])).is_err());
        assert!(matches!(
            HeaderFilter::try_from_json(&json!({ "Subject": "line\r\nbreak" })),
            Err(ImapError::InvalidCriteria(_))
        ));
    }

    #[test]
    fn empty_criteria_search_all() {
        assert_eq!(SearchCriteria::default().to_imap_query().unwrap(), "ALL");
    }

    #[test]
    fn single_header_query() {
        let filter = HeaderFilter::from_json(&json!({ "Subject": "Order \"42\"" }));
        assert_eq!(
            SearchCriteria::with_header(filter).to_imap_query().unwrap(),
            r#"HEADER "Subject" "Order \"42\"""#
        );
    }

    #[test]
    fn multiple_values_are_ored_and_keys_anded() {
        let filter = HeaderFilter::from_json(&json!({
            "From": "alice@example.com",
            "X-Tag": ["a", "b", "c"],
        }));
        assert_eq!(
            SearchCriteria::with_header(filter).to_imap_query().unwrap(),
            r#"HEADER "From" "alice@example.com" OR HEADER "X-Tag" "a" OR HEADER "X-Tag" "b" HEADER "X-Tag" "c""#
        );
    }

    #[test]
    fn date_bounds_use_imap_date_format() {
        let at = Utc.with_ymd_and_hms(2024, 2, 5, 23, 59, 59).unwrap();
        let criteria = SearchCriteria::default().since(at);
        assert_eq!(criteria.to_imap_query().unwrap(), "SINCE 5-Feb-2024");

        let criteria = SearchCriteria::default().before(at);
        assert_eq!(criteria.to_imap_query().unwrap(), "BEFORE 5-Feb-2024");
    }

    #[test]
    fn non_ascii_values_request_utf8_charset() {
        let filter = HeaderFilter::from_json(&json!({ "Subject": "Größe" }));
        assert_eq!(
            SearchCriteria::with_header(filter).to_imap_query().unwrap(),
            "CHARSET UTF-8 HEADER \"Subject\" \"Größe\""
        );
    }

    #[test]
    fn line_breaks_in_values_are_rejected() {
        let filter = HeaderFilter::from_json(&json!({ "Subject": "x\r\nA999 DELETE INBOX" }));
        assert!(matches!(
            SearchCriteria::with_header(filter).to_imap_query(),
            Err(ImapError::InvalidCriteria(_))
        ));

        let filter = HeaderFilter::from_json(&json!({ "To": ["ok@example.com", "bad\n"] }));
        assert!(SearchCriteria::with_header(filter).to_imap_query().is_err());
    }

    #[test]
    fn control_characters_in_names_are_rejected() {
        let filter = HeaderFilter::from_json(&json!({ "X-Bad\u{0}": "value" }));
        assert!(matches!(
            SearchCriteria::with_header(filter).to_imap_query(),
            Err(ImapError::InvalidCriteria(_))
        ));
    }

    #[test]
    fn tabs_and_quotes_never_reach_the_wire_unescaped() {
        let filter = HeaderFilter::from_json(&json!({ "Subject": "a\tb" }));
        assert!(SearchCriteria::with_header(filter).to_imap_query().is_err());

        let filter = HeaderFilter::from_json(&json!({ "Subject": "say \"hi\" \\o/" }));
        let query = SearchCriteria::with_header(filter).to_imap_query().unwrap();
        assert_eq!(query, r#"HEADER "Subject" "say \"hi\" \\o/""#);
    }
}
