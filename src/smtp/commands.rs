//! Implementation of SMTP commands

use tracing::debug;

use crate::mail::{parse_address, parse_address_list, ParsedAddress};
use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::{CommandKind, SmtpSession};

/// A recognised command with its unparsed argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpCommand<'a> {
    Helo(&'a str),
    Ehlo(&'a str),
    MailFrom(&'a str),
    RcptTo(&'a str),
    Data,
    Rset,
    Noop,
    Quit,
}

/// Prefixes are matched case-insensitively against the start of the line
const PREFIXES: [&str; 8] = [
    "helo", "ehlo", "mail from", "rcpt to", "data", "rset", "noop", "quit",
];

impl<'a> SmtpCommand<'a> {
    /// Recognise a command line; `None` for anything unknown
    pub fn parse(line: &'a str) -> Option<Self> {
        let (prefix, rest) = PREFIXES.iter().find_map(|&prefix| {
            let head = line.get(..prefix.len())?;
            head.eq_ignore_ascii_case(prefix)
                .then(|| (prefix, &line[prefix.len()..]))
        })?;

        // `helox` or `datas` are different words
        if !rest.is_empty() && !rest.starts_with([' ', '\t', ':']) {
            return None;
        }

        let command = match prefix {
            "helo" => SmtpCommand::Helo(rest.trim()),
            "ehlo" => SmtpCommand::Ehlo(rest.trim()),
            "mail from" => SmtpCommand::MailFrom(rest),
            "rcpt to" => SmtpCommand::RcptTo(rest),
            "data" => SmtpCommand::Data,
            "rset" => SmtpCommand::Rset,
            "noop" => SmtpCommand::Noop,
            _ => SmtpCommand::Quit,
        };
        Some(command)
    }
}

/// Handles SMTP commands and returns appropriate responses
#[derive(Debug)]
pub struct SmtpCommandHandler<'a> {
    hostname: &'a str,
}

impl<'a> SmtpCommandHandler<'a> {
    pub fn new(hostname: &'a str) -> Self {
        Self { hostname }
    }

    /// Process a command line and return a response
    pub fn process_command(
        &self,
        command_line: &str,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        if command_line.len() + 2 > SmtpLimits::COMMAND_LINE_MAX_LENGTH {
            return Err(SmtpError::LineTooLong {
                max: SmtpLimits::COMMAND_LINE_MAX_LENGTH,
            });
        }

        let command = SmtpCommand::parse(command_line).ok_or(SmtpError::UnrecognizedCommand)?;
        debug!("Command: {command:?}");

        match command {
            SmtpCommand::Helo(domain) => self.handle_helo(domain, session, false),
            SmtpCommand::Ehlo(domain) => self.handle_helo(domain, session, true),
            SmtpCommand::MailFrom(argument) => self.handle_mail(argument, session),
            SmtpCommand::RcptTo(argument) => self.handle_rcpt(argument, session),
            SmtpCommand::Data => self.handle_data(session),
            SmtpCommand::Rset => self.handle_rset(session),
            SmtpCommand::Noop => Ok(SmtpResponse::ok()),
            SmtpCommand::Quit => Ok(SmtpResponse::quit()),
        }
    }

    fn handle_helo(
        &self,
        domain: &str,
        session: &mut SmtpSession,
        extended: bool,
    ) -> Result<SmtpResponse, SmtpError> {
        if domain.is_empty() {
            return Err(SmtpError::InvalidSyntax(
                "HELO requires domain argument".to_string(),
            ));
        }

        session.set_client_domain(domain)?;

        if extended {
            Ok(SmtpResponse::ehlo(self.hostname, domain))
        } else {
            Ok(SmtpResponse::helo(self.hostname, domain))
        }
    }

    fn handle_mail(
        &self,
        argument: &str,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command(CommandKind::Mail) {
            return Err(SmtpError::InvalidState(
                "MAIL command requires HELO first".to_string(),
            ));
        }

        let path = strip_colon(argument, "MAIL command must be 'MAIL FROM:<address>'")?;

        // Null reverse path, possibly followed by parameters
        if path.starts_with("<>") {
            session.set_sender(None);
            return Ok(SmtpResponse::ok());
        }

        let sender = parse_address(path)?;
        self.validate_email_address(&sender)?;
        session.set_sender(Some(sender));

        Ok(SmtpResponse::ok())
    }

    fn handle_rcpt(
        &self,
        argument: &str,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command(CommandKind::Rcpt) {
            return Err(SmtpError::InvalidState(
                "RCPT command requires MAIL first".to_string(),
            ));
        }

        let paths = strip_colon(argument, "RCPT command must be 'RCPT TO:<address>'")?;
        let recipients = parse_address_list(paths);
        if recipients.is_empty() {
            return Err(SmtpError::InvalidSyntax(
                "No valid recipient address".to_string(),
            ));
        }

        for recipient in &recipients {
            self.validate_email_address(recipient)?;
        }
        session.add_recipients(recipients)?;

        Ok(SmtpResponse::ok())
    }

    fn handle_data(&self, session: &mut SmtpSession) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command(CommandKind::Data) {
            return Err(SmtpError::InvalidState(
                "DATA command requires RCPT first".to_string(),
            ));
        }

        session.start_data_mode()?;

        Ok(SmtpResponse::data_start())
    }

    fn handle_rset(&self, session: &mut SmtpSession) -> Result<SmtpResponse, SmtpError> {
        if !session.can_execute_command(CommandKind::Rset) {
            return Err(SmtpError::InvalidState(
                "RSET command requires HELO first".to_string(),
            ));
        }

        session.reset();
        Ok(SmtpResponse::ok())
    }

    /// Size limits on a parsed path
    fn validate_email_address(&self, address: &ParsedAddress) -> Result<(), SmtpError> {
        if address.account.len() > SmtpLimits::USER_MAX_LENGTH {
            return Err(SmtpError::UserTooLong {
                max: SmtpLimits::USER_MAX_LENGTH,
            });
        }

        if address.domain.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
            return Err(SmtpError::DomainTooLong {
                max: SmtpLimits::DOMAIN_MAX_LENGTH,
            });
        }

        if address.email.len() > SmtpLimits::PATH_MAX_LENGTH {
            return Err(SmtpError::PathTooLong {
                max: SmtpLimits::PATH_MAX_LENGTH,
            });
        }

        if address.account.is_empty() {
            return Err(SmtpError::InvalidSyntax(
                "Invalid email address format".to_string(),
            ));
        }

        Ok(())
    }
}

/// The text after `FROM:` or `TO:`, tolerating spaces around the colon
fn strip_colon<'l>(argument: &'l str, usage: &str) -> Result<&'l str, SmtpError> {
    argument
        .trim_start()
        .strip_prefix(':')
        .map(str::trim)
        .ok_or_else(|| SmtpError::InvalidSyntax(usage.to_string()))
}
