//! Received message and its MIME part tree

use std::borrow::Cow;
use std::fmt;
use std::net::IpAddr;
use std::time::SystemTime;

use quoted_printable::ParseMode;
use tracing::debug;

use super::address::ParsedAddress;
use super::crlf_lines;
use super::header::{HeaderStore, HeaderValue};
use super::multipart::{classify, transition, SplitAction, SplitState};
use super::params::Params;
use crate::dkim::{DkimResult, DkimVerifier};
use crate::dns::DnsResolver;
use crate::spf::{SpfEvaluator, SpfResult};

/// Position of a part in the MIME tree, e.g. `1.2` for the second child of
/// the first child
///
/// The parent of a part is its path without the last element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PartPath(Vec<usize>);

impl PartPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Path of the `index`th (zero based) child
    pub fn child(&self, index: usize) -> Self {
        let mut path = self.0.clone();
        path.push(index);
        Self(path)
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.0.split_last()?;
        Some(Self(parent.to_vec()))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for PartPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("root");
        }
        let parts: Vec<String> = self.0.iter().map(|i| (i + 1).to_string()).collect();
        f.write_str(&parts.join("."))
    }
}

/// A received message (the root) or one MIME part of it
///
/// The session fills in the transfer fields and the raw header and body
/// bytes. [`Envelope::finalize`] derives everything else.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub path: PartPath,

    /// Address of the connecting client
    pub peer_ip: Option<IpAddr>,
    /// Domain given in HELO/EHLO
    pub client_domain: Option<String>,
    /// Reverse path from MAIL FROM, `None` for the null sender `<>`
    pub sender: Option<ParsedAddress>,
    /// Forward paths from RCPT TO
    pub recipients: Vec<ParsedAddress>,

    /// Header block as received, CRLF terminated lines
    pub raw_headers: String,
    pub headers: HeaderStore,
    /// Body as received, boundaries included
    pub raw_body: Vec<u8>,
    /// Decoded content, empty for multipart nodes
    pub body: Vec<u8>,
    pub children: Vec<Envelope>,

    pub dkim: DkimResult,
    pub spf: SpfResult,

    /// When the message was received by the server
    pub timestamp: SystemTime,
}

impl Envelope {
    pub fn new() -> Self {
        Self::part(PartPath::root())
    }

    fn part(path: PartPath) -> Self {
        Self {
            path,
            peer_ip: None,
            client_domain: None,
            sender: None,
            recipients: Vec::new(),
            raw_headers: String::new(),
            headers: HeaderStore::default(),
            raw_body: Vec::new(),
            body: Vec::new(),
            children: Vec::new(),
            dkim: DkimResult::default(),
            spf: SpfResult::default(),
            timestamp: SystemTime::now(),
        }
    }

    /// Parse the message, then run DKIM and SPF
    ///
    /// SPF is checked for the domain of the From header (the envelope sender
    /// when there is none) against the peer address. Authentication failures
    /// only show up in the result fields.
    pub fn finalize(&mut self, resolver: &dyn DnsResolver) {
        self.parse();

        let dkim = DkimVerifier::new(resolver).validate(self);
        self.dkim = dkim;

        let domain = self
            .from_address()
            .or(self.sender.as_ref())
            .map(|address| address.domain.clone());
        self.spf = match (self.peer_ip, domain) {
            (Some(ip), Some(domain)) => SpfEvaluator::new(resolver).check_host(ip, &domain),
            _ => {
                debug!("SPF skipped: no peer address or sender domain");
                SpfResult::None
            }
        };
    }

    /// Headers, part tree and transfer decoding, without authentication
    pub fn parse(&mut self) {
        self.parse_structure();
        self.decode_quoted_printable_bodies();
    }

    fn parse_structure(&mut self) {
        self.headers.parse_raw_headers(&self.raw_headers);
        self.headers.parse_known_headers();
        self.children.clear();

        match self.multipart_boundary() {
            Some(boundary) => self.split_body(&boundary),
            None => self.body = self.raw_body.clone(),
        }
    }

    fn split_body(&mut self, boundary: &str) {
        let raw_body = std::mem::take(&mut self.raw_body);
        let mut state = SplitState::Idle;
        let mut current: Option<Envelope> = None;

        for line in crlf_lines(&raw_body) {
            let (next, action) = transition(state, classify(line, boundary));
            match action {
                SplitAction::Ignore => {}
                SplitAction::StartPart => current = Some(self.next_part()),
                SplitAction::AppendHeader => {
                    if let Some(part) = current.as_mut() {
                        part.raw_headers.push_str(&String::from_utf8_lossy(line));
                        part.raw_headers.push_str("\r\n");
                    }
                }
                SplitAction::AppendBody => {
                    if let Some(part) = current.as_mut() {
                        part.raw_body.extend_from_slice(line);
                        part.raw_body.extend_from_slice(b"\r\n");
                    }
                }
                SplitAction::FinishAndStart => {
                    if let Some(part) = current.take() {
                        self.attach(part);
                    }
                    current = Some(self.next_part());
                }
                SplitAction::Finish => {
                    if let Some(part) = current.take() {
                        self.attach(part);
                    }
                }
            }
            state = next;
        }

        if let Some(part) = current.take() {
            debug!("Multipart body of {} ends without a close delimiter", self.path);
            self.attach(part);
        }

        self.raw_body = raw_body;
        self.body.clear();
    }

    fn next_part(&self) -> Envelope {
        Envelope::part(self.path.child(self.children.len()))
    }

    fn attach(&mut self, mut part: Envelope) {
        part.timestamp = self.timestamp;
        part.parse_structure();
        self.children.push(part);
    }

    /// Decode this node if it is quoted-printable, then every descendant
    pub fn decode_quoted_printable_bodies(&mut self) {
        if self.transfer_encoding().eq_ignore_ascii_case("quoted-printable") {
            match quoted_printable::decode(&self.body, ParseMode::Robust) {
                Ok(decoded) => self.body = decoded,
                Err(e) => debug!("Keeping {} undecoded: {e}", self.path),
            }
        }
        for child in &mut self.children {
            child.decode_quoted_printable_bodies();
        }
    }

    pub fn get_header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get_header(name)
    }

    pub fn content_type(&self) -> Option<&Params> {
        self.get_header("content-type").and_then(HeaderValue::as_params)
    }

    /// Lowercased `type/subtype`, `text/plain` when absent
    pub fn mime_type(&self) -> String {
        self.content_type()
            .and_then(|params| params.get("type"))
            .filter(|mime| !mime.is_empty())
            .unwrap_or("text/plain")
            .to_ascii_lowercase()
    }

    pub fn is_multipart(&self) -> bool {
        self.mime_type().starts_with("multipart/")
    }

    /// Boundary of a multipart node; `None` degrades it to a single part
    fn multipart_boundary(&self) -> Option<String> {
        if !self.is_multipart() {
            return None;
        }
        let boundary = self
            .content_type()
            .and_then(|params| params.get_ignore_case("boundary"))
            .filter(|boundary| !boundary.is_empty());
        if boundary.is_none() {
            debug!("{} is multipart without a boundary", self.path);
        }
        boundary.map(str::to_owned)
    }

    pub fn transfer_encoding(&self) -> String {
        self.headers.text("content-transfer-encoding").trim().to_owned()
    }

    pub fn subject(&self) -> String {
        self.headers.text("subject")
    }

    /// Address of the From header
    pub fn from_address(&self) -> Option<&ParsedAddress> {
        self.get_header("from").and_then(HeaderValue::as_address)
    }

    pub fn has_recipient(&self, email: &str) -> bool {
        self.recipients
            .iter()
            .any(|address| address.email.eq_ignore_ascii_case(email))
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// This node followed by all descendants, depth first
    pub fn parts(&self) -> Vec<&Envelope> {
        let mut parts = vec![self];
        for child in &self.children {
            parts.extend(child.parts());
        }
        parts
    }

    /// Find the part at `path`
    pub fn part_at(&self, path: &PartPath) -> Option<&Envelope> {
        path.0
            .iter()
            .try_fold(self, |node, &index| node.children.get(index))
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}
