//! Conversion of fetched messages into [`EmailRecord`]s.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, SecondsFormat};
use log::{debug, trace};

use crate::imap::types::{Address, RawMessage};
use crate::models::email::{EmailRecord, OneOrMany};
use crate::utils::mime_decoder::{decode_mime_header, decode_quoted_printable};

/// Decodes one fetched message.
///
/// Irregular input never fails the record: a bad date drops that date pair,
/// a malformed header block yields fewer headers.
pub fn decode_message(msg: &RawMessage) -> EmailRecord {
    let mut record = EmailRecord {
        seq: msg.seq,
        ..Default::default()
    };

    if let Some(envelope) = &msg.envelope {
        record.subject = Some(
            envelope
                .subject
                .as_deref()
                .map(decode_mime_header)
                .unwrap_or_default(),
        );

        let from = format_addresses(&envelope.from);
        record.from = match from.len() {
            0 => None,
            1 => from.into_iter().next().map(OneOrMany::One),
            _ => Some(OneOrMany::Many(from)),
        };
        record.to = non_empty(format_addresses(&envelope.to));
        record.cc = non_empty(format_addresses(&envelope.cc));
        record.bcc = non_empty(format_addresses(&envelope.bcc));

        if let Some(date) = envelope.date.as_deref().and_then(parse_envelope_date) {
            record.date = Some(format_date(&date));
            record.date_timestamp = Some(date.timestamp());
        }
    }

    if let Some(internal) = msg.internal_date.filter(is_set) {
        record.internal_date = Some(format_date(&internal));
        record.internal_date_timestamp = Some(internal.timestamp());
    }

    if let Some(text) = &msg.text {
        let decoded = decode_quoted_printable(text);
        record.body = Some(String::from_utf8_lossy(&decoded).into_owned());
    }

    if let Some(header) = &msg.header {
        let headers = parse_header_block(header);
        if !headers.is_empty() {
            record.headers = Some(headers);
        }
    }

    record
}

/// `mailbox@host`, `mailbox` when there is no host, nothing without a mailbox.
pub fn format_address(addr: &Address) -> Option<String> {
    let mailbox = addr.mailbox.as_deref().filter(|m| !m.is_empty())?;
    match addr.host.as_deref().filter(|h| !h.is_empty()) {
        Some(host) => Some(format!("{}@{}", mailbox, host)),
        None => Some(mailbox.to_string()),
    }
}

fn format_addresses(addrs: &[Address]) -> Vec<String> {
    addrs.iter().filter_map(format_address).collect()
}

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

fn is_set(date: &DateTime<FixedOffset>) -> bool {
    date.timestamp() != 0
}

fn parse_envelope_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    // Servers often append a comment such as "(UTC)" that chrono rejects
    let without_comment = match trimmed.find('(') {
        Some(idx) => trimmed[..idx].trim_end(),
        None => trimmed,
    };
    match DateTime::parse_from_rfc2822(without_comment) {
        Ok(date) if is_set(&date) => Some(date),
        Ok(_) => None,
        Err(e) => {
            debug!("Ignoring unparseable envelope date '{}': {}", raw, e);
            None
        }
    }
}

fn format_date(date: &DateTime<FixedOffset>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses a raw header block into lowercased name -> value(s).
///
/// Lines starting with whitespace continue the previous header. Parsing stops at
/// the first blank line. Repeated names become lists in encounter order.
pub fn parse_header_block(raw: &[u8]) -> BTreeMap<String, OneOrMany> {
    let text = String::from_utf8_lossy(raw);
    let mut headers: BTreeMap<String, OneOrMany> = BTreeMap::new();
    let mut current: Option<(String, String)> = None;

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            break;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            match current.as_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                None => trace!("Dropping continuation line without a header: {:?}", line),
            }
            continue;
        }

        let Some((name, value)) = line.split_once(':') else {
            trace!("Skipping malformed header line: {:?}", line);
            continue;
        };

        if let Some((name, value)) = current.take() {
            insert_header(&mut headers, name, value);
        }
        let name = name.trim().to_lowercase();
        current = if name.is_empty() {
            None
        } else {
            Some((name, value.trim().to_string()))
        };
    }

    if let Some((name, value)) = current {
        insert_header(&mut headers, name, value);
    }

    headers
}

fn insert_header(headers: &mut BTreeMap<String, OneOrMany>, name: String, value: String) {
    let value = value.trim().to_string();
    match headers.get_mut(&name) {
        Some(existing) => existing.push(value),
        None => {
            headers.insert(name, OneOrMany::One(value));
        }
    }
}
