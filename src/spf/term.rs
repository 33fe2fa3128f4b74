//! Tokenizing an SPF record into ordered mechanisms and modifiers

/// Result prefix of a mechanism, `+` when omitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Qualifier {
    #[default]
    Pass,
    Fail,
    SoftFail,
    Neutral,
}

impl Qualifier {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Qualifier::Pass),
            '-' => Some(Qualifier::Fail),
            '~' => Some(Qualifier::SoftFail),
            '?' => Some(Qualifier::Neutral),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpfTerm {
    Mechanism {
        qualifier: Qualifier,
        name: String,
        value: String,
    },
    Modifier {
        name: String,
        value: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermState {
    Start,
    Name,
    MechanismValue,
    ModifierValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermAction {
    SetQualifier(Qualifier),
    AppendName(char),
    AppendValue(char),
    Skip,
}

pub fn transition(state: TermState, c: char) -> (TermState, TermAction) {
    use TermAction::*;
    use TermState::*;

    match state {
        Start => match Qualifier::from_char(c) {
            Some(qualifier) => (Name, SetQualifier(qualifier)),
            None => (Name, AppendName(c)),
        },
        Name => match c {
            ':' => (MechanismValue, Skip),
            // `a/24` keeps the slash so the value reads as a cidr suffix
            '/' => (MechanismValue, AppendValue('/')),
            '=' => (ModifierValue, Skip),
            c => (Name, AppendName(c)),
        },
        MechanismValue | ModifierValue => (state, AppendValue(c)),
    }
}

pub fn parse_term(token: &str) -> SpfTerm {
    let mut state = TermState::Start;
    let mut qualifier = Qualifier::default();
    let mut name = String::new();
    let mut value = String::new();

    for c in token.chars() {
        let (next, action) = transition(state, c);
        match action {
            TermAction::SetQualifier(q) => qualifier = q,
            TermAction::AppendName(c) => name.push(c),
            TermAction::AppendValue(c) => value.push(c),
            TermAction::Skip => {}
        }
        state = next;
    }

    let name = name.to_ascii_lowercase();
    if state == TermState::ModifierValue {
        SpfTerm::Modifier { name, value }
    } else {
        SpfTerm::Mechanism {
            qualifier,
            name,
            value,
        }
    }
}

/// Terms of a record, in declared order, after the `v=spf1` version tag
pub fn parse_record(record: &str) -> Vec<SpfTerm> {
    let lower = record.to_ascii_lowercase();
    let start = lower.find("v=spf").unwrap_or(0);

    record[start..]
        .split_whitespace()
        .skip(1)
        .map(parse_term)
        .collect()
}
