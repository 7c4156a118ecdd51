use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use regex::Regex;

lazy_static::lazy_static! {
    static ref ENCODED_WORD_RE: Regex = Regex::new(
        r"=\?([^?]+)\?([BbQq])\?([^?]*)\?="
    ).unwrap();
}

/// Decode MIME encoded-word headers (RFC 2047)
/// Supports both Q-encoding and B-encoding
/// Format: =?charset?encoding?encoded-text?=
///
/// Whitespace between two adjacent encoded words is dropped, as the RFC requires.
pub fn decode_mime_header(input: &str) -> String {
    let mut result = String::new();
    let mut last_end = 0;
    let mut previous_was_encoded = false;

    for cap in ENCODED_WORD_RE.captures_iter(input) {
        let (full_match, [_charset, encoding, encoded_text]) = cap.extract();
        let Some(whole) = cap.get(0) else {
            continue;
        };

        let between = &input[last_end..whole.start()];
        if !(previous_was_encoded && between.trim().is_empty()) {
            result.push_str(between);
        }

        let decoded = match encoding {
            "B" | "b" => decode_base64_word(encoded_text),
            "Q" | "q" => decode_q_word(encoded_text),
            _ => full_match.to_string(),
        };

        result.push_str(&decoded);
        last_end = whole.end();
        previous_was_encoded = true;
    }

    if last_end == 0 {
        return input.to_string();
    }
    result.push_str(&input[last_end..]);
    result
}

fn decode_base64_word(encoded: &str) -> String {
    BASE64
        .decode(encoded)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_else(|| encoded.to_string())
}

fn decode_q_word(encoded: &str) -> String {
    // In Q-encoding, underscore represents space
    let bytes = decode_escapes(encoded.as_bytes(), true);
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Decode a quoted-printable body (RFC 2045 section 6.7).
///
/// Soft line breaks (`=` at end of line) are removed and `=XX` escapes decoded.
/// Malformed escapes are kept as-is instead of failing the whole body.
pub fn decode_quoted_printable(input: &[u8]) -> Vec<u8> {
    decode_escapes(input, false)
}

fn decode_escapes(bytes: &[u8], underscore_is_space: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'=' => {
                let rest = &bytes[i + 1..];
                if let Some(skip) = soft_break_len(rest) {
                    i += 1 + skip;
                    continue;
                }
                if rest.len() >= 2 {
                    if let (Some(hi), Some(lo)) = (hex_value(rest[0]), hex_value(rest[1])) {
                        out.push(hi << 4 | lo);
                        i += 3;
                        continue;
                    }
                }
                out.push(b'=');
                i += 1;
            }
            b'_' if underscore_is_space => {
                out.push(b' ');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    out
}

/// Length of a soft line break following `=`: optional trailing spaces/tabs, then CRLF or LF.
fn soft_break_len(rest: &[u8]) -> Option<usize> {
    let ws = rest.iter().take_while(|b| **b == b' ' || **b == b'\t').count();
    match &rest[ws..] {
        [b'\r', b'\n', ..] => Some(ws + 2),
        [b'\n', ..] => Some(ws + 1),
        [] => Some(ws),
        _ => None,
    }
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}
