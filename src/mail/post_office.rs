//! Delivery of finalized messages

use std::sync::mpsc::Sender;

use tracing::{info, warn};

use super::envelope::Envelope;

/// Receives every message once it has been parsed and authenticated
pub trait PostOffice: Send + Sync {
    fn on_mail_dropped_off(&self, envelope: Envelope);
}

/// Hand messages to a channel, for embedding and tests
impl PostOffice for Sender<Envelope> {
    fn on_mail_dropped_off(&self, envelope: Envelope) {
        if self.send(envelope).is_err() {
            warn!("Mail receiver dropped, discarding message");
        }
    }
}

/// Logs a summary of each message and discards it
#[derive(Debug, Default)]
pub struct ConsolePostOffice;

impl PostOffice for ConsolePostOffice {
    fn on_mail_dropped_off(&self, envelope: Envelope) {
        let sender = envelope
            .sender
            .as_ref()
            .map_or("<>", |address| address.email.as_str());
        let recipients: Vec<&str> = envelope
            .recipients
            .iter()
            .map(|address| address.email.as_str())
            .collect();

        info!(
            sender,
            recipients = %recipients.join(", "),
            subject = %envelope.subject(),
            dkim = %envelope.dkim,
            spf = %envelope.spf,
            "Mail dropped off"
        );

        for part in envelope.parts() {
            info!(
                "  {:indent$}{} {} ({} bytes)",
                "",
                part.path,
                part.mime_type(),
                part.body.len(),
                indent = part.path.depth() * 2
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::address::ParsedAddress;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_channel_delivery() {
        let (tx, rx) = mpsc::channel();
        let mut envelope = Envelope::new();
        envelope.recipients.push(ParsedAddress::new("", "bob", "example.com"));

        tx.on_mail_dropped_off(envelope);

        let received = rx.recv_timeout(Duration::from_millis(100)).unwrap();
        assert!(received.has_recipient("BOB@example.com"));
    }

    #[test]
    fn test_channel_delivery_without_receiver() {
        let (tx, rx) = mpsc::channel::<Envelope>();
        drop(rx);
        tx.on_mail_dropped_off(Envelope::new());
    }

    #[test]
    fn test_console_post_office() {
        let mut envelope = Envelope::new();
        envelope.raw_headers = "Subject: hi\r\n".to_owned();
        envelope.parse();
        ConsolePostOffice.on_mail_dropped_off(envelope);
    }
}
