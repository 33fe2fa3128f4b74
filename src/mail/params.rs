//! Parser for semicolon delimited `key=value` header values
//!
//! Handles `Content-Type`, `Content-Disposition` style headers as well as the
//! tag list of a `DKIM-Signature`. The leading token (for example
//! `text/plain`) is stored under a caller supplied initial key.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuredHeaderError {
    #[error("'=' is not allowed in the leading value")]
    EqualsInInitialValue,
}

/// Ordered `key -> value` pairs of a structured header
///
/// Keys are stored verbatim. A repeated key keeps its first position and the
/// last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(String, String)>,
}

impl Params {
    /// Exact key lookup
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// ASCII case-insensitive key lookup, used for MIME parameters
    pub fn get_ignore_case(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn insert(&mut self, key: &str, value: String) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_owned(), value)),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamState {
    ReadingInitialKey,
    ReadingNextKey,
    ReadingValue,
    ReadingStringValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamAction {
    AppendKey(char),
    AppendValue(char),
    /// `=` seen, the value of the current key starts
    StartValue,
    /// Store the current key and value, then reset both
    EndEntry,
    /// Drop a key that never got a value
    DiscardKey,
    Skip,
}

/// Single step of the structured header scanner
pub fn transition(
    state: ParamState,
    c: char,
) -> Result<(ParamState, ParamAction), StructuredHeaderError> {
    use ParamAction::*;
    use ParamState::*;

    let next = match state {
        ReadingInitialKey => match c {
            ';' => (ReadingNextKey, EndEntry),
            '=' => return Err(StructuredHeaderError::EqualsInInitialValue),
            c if c.is_whitespace() => (state, Skip),
            c => (state, AppendValue(c)),
        },
        ReadingNextKey => match c {
            ';' => (state, DiscardKey),
            '=' => (ReadingValue, StartValue),
            '"' => (state, Skip),
            c if c.is_whitespace() => (state, Skip),
            c => (state, AppendKey(c)),
        },
        ReadingValue => match c {
            ';' => (ReadingNextKey, EndEntry),
            '"' => (ReadingStringValue, Skip),
            c if c.is_whitespace() => (state, Skip),
            c => (state, AppendValue(c)),
        },
        ReadingStringValue => match c {
            '"' => (ReadingNextKey, EndEntry),
            c => (state, AppendValue(c)),
        },
    };
    Ok(next)
}

/// Parse `text` into ordered parameters
///
/// With an empty `initial_key` the text is read as a plain tag list
/// (`v=1; a=rsa-sha256; ...`).
pub fn parse_semicolon_delimited(
    text: &str,
    initial_key: &str,
) -> Result<Params, StructuredHeaderError> {
    let mut params = Params::default();
    let mut key = String::new();
    let mut value = String::new();

    let mut state = if initial_key.is_empty() {
        ParamState::ReadingNextKey
    } else {
        key.push_str(initial_key);
        ParamState::ReadingInitialKey
    };

    for c in text.chars() {
        let (next, action) = transition(state, c)?;
        match action {
            ParamAction::AppendKey(c) => key.push(c),
            ParamAction::AppendValue(c) => value.push(c),
            ParamAction::StartValue => value.clear(),
            ParamAction::EndEntry => {
                params.insert(&key, std::mem::take(&mut value));
                key.clear();
            }
            ParamAction::DiscardKey => key.clear(),
            ParamAction::Skip => {}
        }
        state = next;
    }

    if state != ParamState::ReadingNextKey {
        params.insert(&key, value);
    }

    Ok(params)
}
