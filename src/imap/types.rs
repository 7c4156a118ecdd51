use chrono::{DateTime, FixedOffset};

/// Flag the server uses to mark a message for expunge.
pub const DELETED_FLAG: &str = "\\Deleted";

/// One address from a message envelope, as the server reported it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Address {
    pub name: Option<String>,
    pub mailbox: Option<String>,
    pub host: Option<String>,
}

impl Address {
    pub fn new(mailbox: &str, host: &str) -> Self {
        Self {
            name: None,
            mailbox: Some(mailbox.to_string()),
            host: Some(host.to_string()),
        }
    }
}

/// Envelope metadata of a fetched message.
///
/// `date` and `subject` are kept exactly as sent by the server; decoding happens later.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub date: Option<String>,
    pub subject: Option<String>,
    pub from: Vec<Address>,
    pub to: Vec<Address>,
    pub cc: Vec<Address>,
    pub bcc: Vec<Address>,
}

/// Owned copy of a single FETCH response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    /// Sequence number within the selected mailbox. Not stable across sessions.
    pub seq: u32,
    pub envelope: Option<Envelope>,
    /// Server arrival time.
    pub internal_date: Option<DateTime<FixedOffset>>,
    /// BODY[HEADER] section.
    pub header: Option<Vec<u8>>,
    /// BODY[TEXT] section.
    pub text: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchItem {
    Envelope,
    InternalDate,
    HeaderSection,
    TextSection,
}

impl FetchItem {
    pub fn as_imap_str(&self) -> &'static str {
        match self {
            FetchItem::Envelope => "ENVELOPE",
            FetchItem::InternalDate => "INTERNALDATE",
            FetchItem::HeaderSection => "BODY.PEEK[HEADER]",
            FetchItem::TextSection => "BODY.PEEK[TEXT]",
        }
    }
}

/// Everything the decoder needs for a full `EmailRecord`.
pub const MESSAGE_FETCH_ITEMS: &[FetchItem] = &[
    FetchItem::Envelope,
    FetchItem::InternalDate,
    FetchItem::HeaderSection,
    FetchItem::TextSection,
];

/// Renders a FETCH item list, e.g. `(ENVELOPE INTERNALDATE)`.
pub fn fetch_query(items: &[FetchItem]) -> String {
    let parts: Vec<&str> = items.iter().map(FetchItem::as_imap_str).collect();
    format!("({})", parts.join(" "))
}

/// Renders the STORE item that adds `flags`. The silent form suppresses the
/// untagged FETCH replies.
pub fn add_flags_query(flags: &[String]) -> String {
    format!("+FLAGS.SILENT ({})", flags.join(" "))
}

/// Compresses ids into an IMAP sequence set, e.g. `[1, 2, 3, 7]` -> `1:3,7`.
pub fn sequence_set(ids: &[u32]) -> String {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges: Vec<String> = Vec::new();
    let mut iter = sorted.into_iter();
    let Some(first) = iter.next() else {
        return String::new();
    };
    let (mut start, mut end) = (first, first);
    for id in iter {
        if id == end + 1 {
            end = id;
            continue;
        }
        ranges.push(format_range(start, end));
        start = id;
        end = id;
    }
    ranges.push(format_range(start, end));
    ranges.join(",")
}

fn format_range(start: u32, end: u32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{}:{}", start, end)
    }
}
