//! Address parsing for `Name <user@domain>` and bare `user@domain` forms

use thiserror::Error;
use tracing::debug;

/// A single parsed mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    /// Display name, quotes stripped (may be empty)
    pub name: String,
    /// Local part before the `@`
    pub account: String,
    /// Domain after the `@`
    pub domain: String,
    /// Always `account@domain`
    pub email: String,
}

impl ParsedAddress {
    /// Create an address from its parts
    pub fn new(name: &str, account: &str, domain: &str) -> Self {
        Self {
            name: name.to_owned(),
            account: account.to_owned(),
            domain: domain.to_owned(),
            email: format!("{account}@{domain}"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressFormatError {
    #[error("unexpected '{found}' while {state}")]
    UnexpectedCharacter { found: char, state: AddressState },

    #[error("address has no domain part")]
    MissingDomain,
}

/// Scanner state of the address parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressState {
    ReadingName,
    ReadingAccount,
    ReadingDomain,
}

impl std::fmt::Display for AddressState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AddressState::ReadingName => "reading name",
            AddressState::ReadingAccount => "reading account",
            AddressState::ReadingDomain => "reading domain",
        })
    }
}

/// What the scanner does with the current character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressAction {
    /// Append to the buffer belonging to the next state
    Push(char),
    /// The name read so far was really the account (bare `user@domain`)
    PromoteNameToAccount,
    ToggleQuotes,
    Skip,
    Finish,
}

/// Single step of the address scanner
pub fn transition(
    state: AddressState,
    in_quotes: bool,
    c: char,
) -> Result<(AddressState, AddressAction), AddressFormatError> {
    use AddressAction::*;
    use AddressState::*;

    let unexpected = || AddressFormatError::UnexpectedCharacter { found: c, state };

    match c {
        '\r' | '\n' => Ok((state, Skip)),
        '"' => Ok((state, ToggleQuotes)),
        _ if in_quotes => Ok((state, Push(c))),
        '<' => match state {
            ReadingName => Ok((ReadingAccount, Skip)),
            _ => Err(unexpected()),
        },
        '@' => match state {
            ReadingName => Ok((ReadingDomain, PromoteNameToAccount)),
            ReadingAccount => Ok((ReadingDomain, Skip)),
            ReadingDomain => Err(unexpected()),
        },
        '>' => match state {
            ReadingDomain => Ok((ReadingDomain, Finish)),
            _ => Err(unexpected()),
        },
        _ => Ok((state, Push(c))),
    }
}

/// Parse a single address such as `"Jane Doe" <jane@example.com>` or `jane@example.com`
pub fn parse_address(text: &str) -> Result<ParsedAddress, AddressFormatError> {
    let mut state = AddressState::ReadingName;
    let mut in_quotes = false;
    let mut name = String::new();
    let mut account = String::new();
    let mut domain = String::new();

    for c in text.chars() {
        let (next, action) = transition(state, in_quotes, c)?;
        match action {
            AddressAction::Push(c) => match next {
                AddressState::ReadingName => name.push(c),
                AddressState::ReadingAccount => account.push(c),
                AddressState::ReadingDomain => domain.push(c),
            },
            AddressAction::PromoteNameToAccount => account = std::mem::take(&mut name),
            AddressAction::ToggleQuotes => in_quotes = !in_quotes,
            AddressAction::Skip => {}
            AddressAction::Finish => {
                state = next;
                break;
            }
        }
        state = next;
    }

    let domain = domain.trim();
    if state != AddressState::ReadingDomain || domain.is_empty() {
        return Err(AddressFormatError::MissingDomain);
    }

    Ok(ParsedAddress::new(name.trim(), account.trim(), domain))
}

/// Parse a comma separated list of addresses
///
/// Commas inside a quoted display name do not split the list. Entries that
/// fail to parse are skipped.
pub fn parse_address_list(text: &str) -> Vec<ParsedAddress> {
    split_top_level(text)
        .into_iter()
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match parse_address(entry) {
            Ok(address) => Some(address),
            Err(e) => {
                debug!("Skipping unparseable address {entry:?}: {e}");
                None
            }
        })
        .collect()
}

fn split_top_level(text: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                entries.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    entries.push(&text[start..]);
    entries
}
