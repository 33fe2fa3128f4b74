//! Raw and typed header storage for a message or MIME part

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use thiserror::Error;
use tracing::debug;

use super::address::{parse_address, parse_address_list, AddressFormatError, ParsedAddress};
use super::params::{parse_semicolon_delimited, Params, StructuredHeaderError};

/// Headers whose value is a single mailbox
const ADDRESS_HEADERS: &[&str] = &["from", "sender", "reply-to", "return-path"];
/// Headers whose value is a mailbox list
const ADDRESS_LIST_HEADERS: &[&str] = &["to", "cc", "bcc"];
/// Headers whose value is a structured parameter list
const STRUCTURED_HEADERS: &[(&str, &str)] = &[
    ("content-type", "type"),
    ("content-disposition", "disposition"),
    ("dkim-signature", ""),
];

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("invalid address: {0}")]
    Address(#[from] AddressFormatError),

    #[error("invalid structured value: {0}")]
    Structured(#[from] StructuredHeaderError),

    #[error("invalid date: {0}")]
    Date(#[from] chrono::ParseError),
}

/// One header line as received, continuation lines included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHeader {
    /// Field name without the colon
    pub name: String,
    /// Trimmed value; folded lines keep their CRLF
    pub value: String,
    raw_name: String,
    raw_value: String,
}

impl RawHeader {
    /// Field name exactly as it preceded the colon
    pub fn raw_name(&self) -> &str {
        &self.raw_name
    }

    /// Value exactly as it followed the colon, untrimmed
    pub fn raw_value(&self) -> &str {
        &self.raw_value
    }
}

/// Typed interpretation of a header value
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Text(String),
    Date(DateTime<FixedOffset>),
    Address(ParsedAddress),
    AddressList(Vec<ParsedAddress>),
    Params(Params),
}

impl HeaderValue {
    pub fn as_address(&self) -> Option<&ParsedAddress> {
        match self {
            HeaderValue::Address(address) => Some(address),
            _ => None,
        }
    }

    pub fn as_address_list(&self) -> Option<&[ParsedAddress]> {
        match self {
            HeaderValue::AddressList(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_params(&self) -> Option<&Params> {
        match self {
            HeaderValue::Params(params) => Some(params),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            HeaderValue::Date(date) => Some(date),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Raw header lines plus their typed values keyed by lowercase name
///
/// The raw list keeps every occurrence in order. The typed map keeps only the
/// last occurrence of each name.
#[derive(Debug, Clone, Default)]
pub struct HeaderStore {
    raw: Vec<RawHeader>,
    parsed: BTreeMap<String, HeaderValue>,
}

impl HeaderStore {
    /// Split a CRLF separated header block into raw headers
    ///
    /// Lines starting with a space or tab continue the previous header. Lines
    /// without a colon are dropped.
    pub fn parse_raw_headers(&mut self, raw: &str) {
        self.raw.clear();

        for line in raw.split("\r\n") {
            if line.is_empty() {
                continue;
            }

            if line.starts_with([' ', '\t']) {
                match self.raw.last_mut() {
                    Some(header) => {
                        header.raw_value.push_str("\r\n");
                        header.raw_value.push_str(line);
                        header.value = header.raw_value.trim().to_owned();
                    }
                    None => debug!("Dropping continuation line before any header"),
                }
                continue;
            }

            match line.split_once(':') {
                Some((name, value)) => self.raw.push(RawHeader {
                    name: name.trim().to_owned(),
                    value: value.trim().to_owned(),
                    raw_name: name.to_owned(),
                    raw_value: value.to_owned(),
                }),
                None => debug!("Dropping header line without a colon: {line:?}"),
            }
        }
    }

    /// Fill the typed map from the raw headers
    ///
    /// A value that fails its typed parse is kept as text.
    pub fn parse_known_headers(&mut self) {
        self.parsed.clear();

        for header in &self.raw {
            let key = header.name.to_ascii_lowercase();
            let text = unfold_header_value(&header.value);
            let value = interpret(&key, &text).unwrap_or_else(|e| {
                debug!("Keeping {key} header as text: {e}");
                HeaderValue::Text(text)
            });
            self.parsed.insert(key, value);
        }
    }

    /// Typed value of the last header named `name` (case-insensitive)
    pub fn get_header(&self, name: &str) -> Option<&HeaderValue> {
        self.parsed.get(&name.to_ascii_lowercase())
    }

    /// Unfolded text of the last header named `name`, empty when absent
    pub fn text(&self, name: &str) -> String {
        self.last_raw(name)
            .map(|header| unfold_header_value(&header.value))
            .unwrap_or_default()
    }

    /// Last occurrence of a header, which is what DKIM signs
    pub fn last_raw(&self, name: &str) -> Option<&RawHeader> {
        self.raw
            .iter()
            .rev()
            .find(|header| header.name.eq_ignore_ascii_case(name))
    }

    pub fn raw_headers(&self) -> &[RawHeader] {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

fn interpret(key: &str, text: &str) -> Result<HeaderValue, HeaderError> {
    if key == "date" {
        return Ok(HeaderValue::Date(parse_date(text)?));
    }
    if ADDRESS_HEADERS.contains(&key) {
        return Ok(HeaderValue::Address(parse_address(text)?));
    }
    if ADDRESS_LIST_HEADERS.contains(&key) {
        return Ok(HeaderValue::AddressList(parse_address_list(text)));
    }
    if let Some((_, initial_key)) = STRUCTURED_HEADERS.iter().find(|(name, _)| *name == key) {
        return Ok(HeaderValue::Params(parse_semicolon_delimited(
            text,
            initial_key,
        )?));
    }
    Ok(HeaderValue::Text(text.to_owned()))
}

/// Parse an RFC 2822 date, ignoring a trailing `(comment)` such as `(UTC)`
fn parse_date(text: &str) -> Result<DateTime<FixedOffset>, chrono::ParseError> {
    let text = text.trim();
    let text = match (text.ends_with(')'), text.rfind('(')) {
        (true, Some(open)) => text[..open].trim_end(),
        _ => text,
    };
    DateTime::parse_from_rfc2822(text)
}

/// Replace each CRLF and the whitespace run after it with a single space
pub fn unfold_header_value(value: &str) -> String {
    let mut unfolded = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(pos) = rest.find("\r\n") {
        unfolded.push_str(&rest[..pos]);
        rest = rest[pos + 2..].trim_start_matches([' ', '\t']);
        unfolded.push(' ');
    }
    unfolded.push_str(rest);
    unfolded
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn store(raw: &str) -> HeaderStore {
        let mut store = HeaderStore::default();
        store.parse_raw_headers(raw);
        store.parse_known_headers();
        store
    }

    #[test]
    fn test_raw_headers_in_order() {
        let store = store("From: a@x.com\r\nSubject: Hi\r\n");
        let names: Vec<&str> = store.raw_headers().iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["From", "Subject"]);
        assert_eq!(store.raw_headers()[1].value, "Hi");
        assert_eq!(store.raw_headers()[1].raw_value(), " Hi");
    }

    #[test]
    fn test_continuation_lines_keep_crlf() {
        let store = store("Subject: hello\r\n world\r\nTo: b@y.com\r\n");
        let subject = &store.raw_headers()[0];
        assert_eq!(subject.value, "hello\r\n world");
        assert_eq!(store.text("subject"), "hello world");
    }

    #[test]
    fn test_line_without_colon_is_dropped() {
        let store = store("garbage line\r\nSubject: ok\r\n");
        assert_eq!(store.raw_headers().len(), 1);
    }

    #[test]
    fn test_from_is_typed_address() {
        let store = store("From: \"Jane Doe\" <jane@example.com>\r\n");
        let from = store.get_header("FROM").and_then(HeaderValue::as_address).unwrap();
        assert_eq!(from.name, "Jane Doe");
        assert_eq!(from.domain, "example.com");
    }

    #[test]
    fn test_to_is_address_list() {
        let store = store("To: a@x.com,\r\n b@y.com\r\n");
        let to = store.get_header("to").and_then(HeaderValue::as_address_list).unwrap();
        assert_eq!(to.len(), 2);
        assert_eq!(to[1].email, "b@y.com");
    }

    #[test]
    fn test_content_type_params() {
        let store = store("Content-Type: multipart/alternative;\r\n\tboundary=\"XyZ\"\r\n");
        let params = store.get_header("content-type").and_then(HeaderValue::as_params).unwrap();
        assert_eq!(params.get("type"), Some("multipart/alternative"));
        assert_eq!(params.get_ignore_case("boundary"), Some("XyZ"));
    }

    #[test]
    fn test_date_with_comment() {
        let store = store("Date: Tue, 1 Jul 2003 10:52:37 +0200 (CEST)\r\n");
        let date = store.get_header("date").and_then(HeaderValue::as_date).unwrap();
        assert_eq!(date.year(), 2003);
        assert_eq!(date.hour(), 10);
        assert_eq!(date.offset().local_minus_utc(), 2 * 3600);
    }

    #[test]
    fn test_bad_values_degrade_to_text() {
        let store = store("From: not an address\r\nDate: yesterday\r\n");
        assert_eq!(
            store.get_header("from"),
            Some(&HeaderValue::Text("not an address".to_owned()))
        );
        assert_eq!(store.get_header("date").and_then(HeaderValue::as_text), Some("yesterday"));
    }

    #[test]
    fn test_duplicate_headers() {
        let store = store("Received: one\r\nReceived: two\r\n");
        assert_eq!(store.raw_headers().len(), 2);
        assert_eq!(store.get_header("received").and_then(HeaderValue::as_text), Some("two"));
        assert_eq!(store.last_raw("RECEIVED").map(|h| h.value.as_str()), Some("two"));
    }

    #[test]
    fn test_absent_header() {
        let store = store("Subject: x\r\n");
        assert!(store.get_header("cc").is_none());
        assert_eq!(store.text("cc"), "");
    }

    #[test]
    fn test_unfold() {
        assert_eq!(unfold_header_value("a\r\n\t  b\r\n c"), "a b c");
        assert_eq!(unfold_header_value("plain"), "plain");
    }
}
