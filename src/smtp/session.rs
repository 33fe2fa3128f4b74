//! SMTP session state management

use std::mem;
use std::net::IpAddr;
use std::time::SystemTime;

use crate::mail::{Envelope, ParsedAddress};
use crate::smtp::error::{SmtpError, SmtpLimits};

/// Represents the current state of an SMTP session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpState {
    /// Initial state - waiting for HELO
    Initial,
    /// HELO received - ready for MAIL command
    GreetingReceived,
    /// MAIL FROM received - ready for RCPT commands
    MailReceived,
    /// At least one RCPT TO received - ready for DATA or more RCPT commands
    RecipientsReceived,
    /// DATA accepted, reading the header block
    DataHeaders,
    /// Blank line seen, reading the body
    DataBody,
}

/// The command a state check is made for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Helo,
    Mail,
    Rcpt,
    Data,
    Rset,
    Noop,
    Quit,
}

/// Per-connection state: the protocol position and the message being built
#[derive(Debug)]
pub struct SmtpSession {
    pub state: SmtpState,
    /// Message under construction, addressed by MAIL/RCPT and filled by DATA
    pub envelope: Envelope,
    /// Client domain from HELO command
    pub client_domain: Option<String>,
    pub peer_ip: Option<IpAddr>,
    /// Bytes of DATA collected so far
    pub data_size: usize,
    /// Set once a message has been terminated, cleared by the next MAIL
    pub received_end_of_data: bool,
}

impl SmtpSession {
    pub fn new(peer_ip: Option<IpAddr>) -> Self {
        let mut session = Self {
            state: SmtpState::Initial,
            envelope: Envelope::new(),
            client_domain: None,
            peer_ip,
            data_size: 0,
            received_end_of_data: false,
        };
        session.envelope = session.fresh_envelope();
        session
    }

    fn fresh_envelope(&self) -> Envelope {
        let mut envelope = Envelope::new();
        envelope.peer_ip = self.peer_ip;
        envelope.client_domain = self.client_domain.clone();
        envelope
    }

    /// Drop the current transaction, keeping the HELO identity
    pub fn reset(&mut self) {
        self.state = SmtpState::GreetingReceived;
        self.envelope = self.fresh_envelope();
        self.data_size = 0;
    }

    pub fn set_client_domain(&mut self, domain: &str) -> Result<(), SmtpError> {
        if domain.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
            return Err(SmtpError::DomainTooLong {
                max: SmtpLimits::DOMAIN_MAX_LENGTH,
            });
        }

        self.client_domain = Some(domain.to_owned());
        self.reset();
        Ok(())
    }

    /// Start a transaction; `None` is the null reverse path
    pub fn set_sender(&mut self, sender: Option<ParsedAddress>) {
        self.envelope = self.fresh_envelope();
        self.envelope.sender = sender;
        self.data_size = 0;
        self.received_end_of_data = false;
        self.state = SmtpState::MailReceived;
    }

    pub fn add_recipients(&mut self, recipients: Vec<ParsedAddress>) -> Result<(), SmtpError> {
        if self.envelope.recipients.len() + recipients.len() > SmtpLimits::MAX_RECIPIENTS {
            return Err(SmtpError::TooManyRecipients {
                max: SmtpLimits::MAX_RECIPIENTS,
            });
        }

        self.envelope.recipients.extend(recipients);
        self.state = SmtpState::RecipientsReceived;
        Ok(())
    }

    pub fn start_data_mode(&mut self) -> Result<(), SmtpError> {
        if self.state != SmtpState::RecipientsReceived {
            return Err(SmtpError::InvalidState(
                "DATA command requires RCPT first".to_string(),
            ));
        }

        self.data_size = 0;
        self.state = SmtpState::DataHeaders;
        Ok(())
    }

    pub fn in_data_mode(&self) -> bool {
        matches!(self.state, SmtpState::DataHeaders | SmtpState::DataBody)
    }

    /// Add one DATA line, given without its line terminator.
    ///
    /// A leading dot doubled by the client is removed. The first blank line
    /// ends the header block and is stored in neither part.
    pub fn add_data_line(&mut self, line: &[u8]) -> Result<(), SmtpError> {
        let line = match line.strip_prefix(b".") {
            Some(rest) if rest.starts_with(b".") => rest,
            _ => line,
        };
        let line_size = line.len() + 2; // +2 for CRLF

        if line_size > SmtpLimits::TEXT_LINE_MAX_LENGTH {
            return Err(SmtpError::LineTooLong {
                max: SmtpLimits::TEXT_LINE_MAX_LENGTH,
            });
        }

        if self.data_size + line_size > SmtpLimits::MAX_DATA_SIZE {
            return Err(SmtpError::TooMuchData {
                max: SmtpLimits::MAX_DATA_SIZE,
            });
        }
        self.data_size += line_size;

        match self.state {
            SmtpState::DataHeaders if line.is_empty() => {
                self.state = SmtpState::DataBody;
            }
            SmtpState::DataHeaders => {
                let headers = &mut self.envelope.raw_headers;
                headers.push_str(&String::from_utf8_lossy(line));
                headers.push_str("\r\n");
            }
            SmtpState::DataBody => {
                let body = &mut self.envelope.raw_body;
                body.extend_from_slice(line);
                body.extend_from_slice(b"\r\n");
            }
            _ => {
                return Err(SmtpError::InvalidState(
                    "Not in data collection mode".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Hand over the collected message and get ready for the next one
    pub fn finish_data_collection(&mut self) -> Result<Envelope, SmtpError> {
        if !self.in_data_mode() {
            return Err(SmtpError::InvalidState(
                "Not in data collection mode".to_string(),
            ));
        }

        let fresh = self.fresh_envelope();
        let mut envelope = mem::replace(&mut self.envelope, fresh);
        envelope.timestamp = SystemTime::now();

        self.state = SmtpState::GreetingReceived;
        self.data_size = 0;
        self.received_end_of_data = true;
        Ok(envelope)
    }

    /// Check if the session is ready for a specific command
    pub fn can_execute_command(&self, command: CommandKind) -> bool {
        match command {
            CommandKind::Helo | CommandKind::Noop | CommandKind::Quit => true,
            CommandKind::Mail => self.state == SmtpState::GreetingReceived,
            CommandKind::Rcpt => matches!(
                self.state,
                SmtpState::MailReceived | SmtpState::RecipientsReceived
            ),
            CommandKind::Data => self.state == SmtpState::RecipientsReceived,
            CommandKind::Rset => self.state != SmtpState::Initial,
        }
    }

    pub fn recipient_count(&self) -> usize {
        self.envelope.recipients.len()
    }
}

impl Default for SmtpSession {
    fn default() -> Self {
        Self::new(None)
    }
}
