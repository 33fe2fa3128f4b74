//! SMTP reply formatting

use crate::smtp::error::SmtpLimits;

/// A reply sent to the client
#[derive(Debug, Clone)]
pub struct SmtpResponse {
    /// The SMTP reply code (e.g., "250", "354", "500")
    pub code: String,
    /// The human-readable message
    pub message: String,
    /// Continuation lines, used by the EHLO reply
    pub multiline: Option<Vec<String>>,
}

impl SmtpResponse {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            multiline: None,
        }
    }

    pub fn new_multiline(code: &str, message: &str, lines: Vec<String>) -> Self {
        Self {
            code: code.to_owned(),
            message: message.to_owned(),
            multiline: Some(lines),
        }
    }

    /// 250 Ok
    pub fn ok() -> Self {
        Self::new("250", "Ok")
    }

    /// Banner sent on connect
    pub fn greeting(hostname: &str) -> Self {
        Self::new("220", &format!("{hostname} ESMTP umimail"))
    }

    pub fn helo(hostname: &str, client_domain: &str) -> Self {
        Self::new("250", &format!("{hostname} Hello {client_domain}"))
    }

    /// EHLO reply listing the extensions the data reader tolerates
    pub fn ehlo(hostname: &str, client_domain: &str) -> Self {
        let capabilities = vec![
            "8BITMIME".to_owned(),
            format!("SIZE {}", SmtpLimits::MAX_DATA_SIZE),
        ];
        Self::new_multiline(
            "250",
            &format!("{hostname} Hello {client_domain}"),
            capabilities,
        )
    }

    pub fn data_start() -> Self {
        Self::new("354", "End data with <CR><LF>.<CR><LF>")
    }

    pub fn quit() -> Self {
        Self::new("221", "Bye")
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self::new(code, message)
    }

    /// Format the reply for sending over the wire
    pub fn format(&self) -> String {
        if let Some(ref lines) = self.multiline {
            let mut result = format!("{}-{}\r\n", self.code, self.message);
            for (i, line) in lines.iter().enumerate() {
                let separator = if i == lines.len() - 1 { ' ' } else { '-' };
                result.push_str(&format!("{}{separator}{line}\r\n", self.code));
            }
            result
        } else {
            format!("{} {}\r\n", self.code, self.message)
        }
    }

    /// Check if this is a success reply (2xx)
    pub fn is_success(&self) -> bool {
        self.code.starts_with('2')
    }

    /// Check if this is the reply that ends the session
    pub fn is_closing(&self) -> bool {
        self.code == "221"
    }
}
