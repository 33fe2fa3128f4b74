//! Line classifier and state machine for splitting a multipart body

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// `--boundary`
    Delimiter,
    /// `--boundary--`
    CloseDelimiter,
    Blank,
    Other,
}

/// Trailing spaces and tabs after a delimiter are transport padding
pub fn classify(line: &[u8], boundary: &str) -> LineKind {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b' ' | b'\t') {
        end -= 1;
    }
    let line = &line[..end];

    if line.is_empty() {
        return LineKind::Blank;
    }

    let Some(rest) = line
        .strip_prefix(b"--")
        .and_then(|rest| rest.strip_prefix(boundary.as_bytes()))
    else {
        return LineKind::Other;
    };

    match rest {
        b"" => LineKind::Delimiter,
        b"--" => LineKind::CloseDelimiter,
        _ => LineKind::Other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitState {
    /// Preamble before the first delimiter
    Idle,
    ParsingHeaders,
    ParsingBody,
    /// After the close delimiter; the epilogue is ignored
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitAction {
    Ignore,
    StartPart,
    AppendHeader,
    AppendBody,
    /// Attach the current part and begin the next one
    FinishAndStart,
    Finish,
}

pub fn transition(state: SplitState, line: LineKind) -> (SplitState, SplitAction) {
    use LineKind::*;
    use SplitAction::*;
    use SplitState::*;

    match (state, line) {
        (Idle, Delimiter) => (ParsingHeaders, StartPart),
        (Idle, CloseDelimiter) => (Closed, Ignore),
        (Idle, _) => (Idle, Ignore),

        (ParsingHeaders | ParsingBody, Delimiter) => (ParsingHeaders, FinishAndStart),
        (ParsingHeaders | ParsingBody, CloseDelimiter) => (Closed, Finish),
        (ParsingHeaders, Blank) => (ParsingBody, Ignore),
        (ParsingHeaders, Other) => (ParsingHeaders, AppendHeader),
        (ParsingBody, _) => (ParsingBody, AppendBody),

        (Closed, _) => (Closed, Ignore),
    }
}
