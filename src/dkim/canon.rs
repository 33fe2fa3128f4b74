//! DKIM canonicalization (RFC 6376 §3.4)

use crate::mail::header::{unfold_header_value, HeaderStore};
use crate::mail::crlf_lines;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Canonicalization {
    Simple,
    Relaxed,
}

impl Canonicalization {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "simple" => Some(Canonicalization::Simple),
            "relaxed" => Some(Canonicalization::Relaxed),
            _ => None,
        }
    }
}

/// Canonical header block for the signed `names`, in that order
///
/// The bottom-most occurrence of each name is used and names that are not
/// present are skipped. The `b=` value of the `dkim-signature` entry is
/// emptied. The final CRLF is not included.
pub fn canonicalize_headers(
    store: &HeaderStore,
    names: &[String],
    mode: Canonicalization,
) -> String {
    let mut block = String::new();

    for name in names {
        let Some(header) = store.last_raw(name) else {
            continue;
        };

        let mut line = match mode {
            Canonicalization::Simple => format!("{}:{}", header.raw_name(), header.raw_value()),
            Canonicalization::Relaxed => format!(
                "{}:{}",
                header.name.to_ascii_lowercase(),
                collapse_whitespace(&unfold_header_value(header.raw_value())).trim()
            ),
        };
        if name == "dkim-signature" {
            line = strip_signature_value(&line);
        }

        block.push_str(&line);
        block.push_str("\r\n");
    }

    if block.ends_with("\r\n") {
        block.truncate(block.len() - 2);
    }
    block
}

/// Empty the value of the `b=` tag, leaving every other byte in place
pub fn strip_signature_value(header_line: &str) -> String {
    let (name, value) = match header_line.split_once(':') {
        Some(parts) => parts,
        None => return header_line.to_owned(),
    };

    let tags: Vec<String> = value
        .split(';')
        .map(|tag| {
            let key_start = tag.len() - tag.trim_start().len();
            match tag[key_start..].split_once('=') {
                Some((key, _)) if key.trim() == "b" => {
                    format!("{}=", &tag[..key_start + key.len()])
                }
                _ => tag.to_owned(),
            }
        })
        .collect();

    format!("{name}:{}", tags.join(";"))
}

/// Canonical body bytes that `bh=` is computed over
pub fn canonicalize_body(body: &[u8], mode: Canonicalization) -> Vec<u8> {
    match mode {
        Canonicalization::Simple => {
            let mut out = body.to_vec();
            while out.ends_with(b"\r\n") {
                out.truncate(out.len() - 2);
            }
            out.extend_from_slice(b"\r\n");
            out
        }
        Canonicalization::Relaxed => {
            let mut out = Vec::with_capacity(body.len());
            for line in crlf_lines(body) {
                let mut collapsed = collapse_whitespace_bytes(line);
                while collapsed.last() == Some(&b' ') {
                    collapsed.pop();
                }
                out.extend_from_slice(&collapsed);
                out.extend_from_slice(b"\r\n");
            }

            while out.ends_with(b"\r\n") {
                out.truncate(out.len() - 2);
            }
            if !out.is_empty() {
                out.extend_from_slice(b"\r\n");
            }
            out
        }
    }
}

/// Replace every run of spaces and tabs with one space
pub fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c == ' ' || c == '\t' {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

fn collapse_whitespace_bytes(line: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len());
    let mut in_space = false;
    for &b in line {
        if b == b' ' || b == b'\t' {
            if !in_space {
                out.push(b' ');
            }
            in_space = true;
        } else {
            out.push(b);
            in_space = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(raw: &str) -> HeaderStore {
        let mut store = HeaderStore::default();
        store.parse_raw_headers(raw);
        store
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_relaxed_headers() {
        let store = store("Subject:  Hello \t World  \r\nFROM: Jane\r\n <jane@example.com>\r\n");
        let block = canonicalize_headers(
            &store,
            &names(&["from", "subject"]),
            Canonicalization::Relaxed,
        );
        assert_eq!(block, "from:Jane <jane@example.com>\r\nsubject:Hello World");
    }

    #[test]
    fn test_simple_headers_keep_raw_value() {
        let store = store("Subject:  Hello \t World  \r\nFROM: Jane\r\n <jane@example.com>\r\n");
        let block = canonicalize_headers(
            &store,
            &names(&["from", "subject"]),
            Canonicalization::Simple,
        );
        assert_eq!(block, "FROM: Jane\r\n <jane@example.com>\r\nSubject:  Hello \t World  ");
    }

    #[test]
    fn test_space_before_colon() {
        let store = store("Subject :x\r\n");
        let simple = canonicalize_headers(&store, &names(&["subject"]), Canonicalization::Simple);
        assert_eq!(simple, "Subject :x");
        let relaxed = canonicalize_headers(&store, &names(&["subject"]), Canonicalization::Relaxed);
        assert_eq!(relaxed, "subject:x");
    }

    #[test]
    fn test_bottom_most_occurrence_and_missing_names() {
        let store = store("X-Tag: first\r\nX-Tag: second\r\n");
        let block =
            canonicalize_headers(&store, &names(&["x-tag", "cc"]), Canonicalization::Relaxed);
        assert_eq!(block, "x-tag:second");
    }

    #[test]
    fn test_relaxed_is_idempotent() {
        let store = store("Subject: a   b\r\n\tc\r\n");
        let once = canonicalize_headers(&store, &names(&["subject"]), Canonicalization::Relaxed);
        let again = store_from_block(&once);
        let twice = canonicalize_headers(&again, &names(&["subject"]), Canonicalization::Relaxed);
        assert_eq!(once, twice);
    }

    fn store_from_block(block: &str) -> HeaderStore {
        store(&format!("{block}\r\n"))
    }

    #[test]
    fn test_signature_value_is_emptied() {
        let line = "dkim-signature:v=1; a=rsa-sha256; bh=abc=; b=c2ln\r\n\tbmF0dXJl; d=x";
        assert_eq!(
            strip_signature_value(line),
            "dkim-signature:v=1; a=rsa-sha256; bh=abc=; b=; d=x"
        );
        assert_eq!(
            strip_signature_value("DKIM-Signature: v=1; b=xyz"),
            "DKIM-Signature: v=1; b="
        );
    }

    #[test]
    fn test_simple_body() {
        assert_eq!(canonicalize_body(b"hi\r\n\r\n\r\n", Canonicalization::Simple), b"hi\r\n");
        assert_eq!(canonicalize_body(b"", Canonicalization::Simple), b"\r\n");
        assert_eq!(canonicalize_body(b"a \r\nb", Canonicalization::Simple), b"a \r\nb\r\n");
    }

    #[test]
    fn test_relaxed_body() {
        assert_eq!(
            canonicalize_body(b" C \r\nD \t E\r\n\r\n\r\n", Canonicalization::Relaxed),
            b" C\r\nD E\r\n"
        );
        assert_eq!(canonicalize_body(b"\r\n \r\n\t\r\n", Canonicalization::Relaxed), b"");
        assert_eq!(canonicalize_body(b"", Canonicalization::Relaxed), b"");
    }

    #[test]
    fn test_parse_canonicalization() {
        assert_eq!(Canonicalization::parse("Relaxed"), Some(Canonicalization::Relaxed));
        assert_eq!(Canonicalization::parse("simple"), Some(Canonicalization::Simple));
        assert_eq!(Canonicalization::parse("nofws"), None);
    }
}
