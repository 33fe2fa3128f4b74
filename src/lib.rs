//! # umimail
//!
//! umimail is an inbound SMTP mail transfer agent.
//!
//! It accepts messages over SMTP, rebuilds their MIME structure, verifies
//! DKIM signatures and evaluates the sender's SPF policy, then hands the
//! result to a [`PostOffice`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::{mpsc, Arc};
//! use std::thread;
//! use std::time::Duration;
//!
//! use umimail::{HickoryResolver, ServerConfig, SmtpServer};
//!
//! let mut config = ServerConfig::new("mx.example.com");
//! config.bind_addr = "127.0.0.1:2525".to_owned();
//! let resolver = HickoryResolver::from_system_conf(config.dns_timeout, config.dns_attempts)?;
//! let server = SmtpServer::new(config, Arc::new(resolver));
//!
//! let (tx, rx) = mpsc::channel();
//! thread::spawn(move || server.start(tx));
//!
//! // Check the authentication results of the next message
//! if let Ok(envelope) = rx.recv_timeout(Duration::from_secs(10)) {
//!     println!("{}: dkim={} spf={}", envelope.subject(), envelope.dkim, envelope.spf);
//! }
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! ## Supported SMTP commands
//!
//! - `HELO` / `EHLO` - Identify the client
//! - `MAIL FROM` - Specify the sender's address, `<>` for bounces
//! - `RCPT TO` - Specify one or more comma separated destinations
//! - `DATA` - Send the message
//! - `RSET` - Reset the current transaction
//! - `NOOP` - Do nothing
//! - `QUIT` - Close connection
//!
//! Any other command closes the connection without a reply.
//!
//! ## Notes
//!
//! - DKIM signatures are verified, never created.
//! - SPF macros are not expanded.
//! - AUTH, STARTTLS and PIPELINING are not supported.
//! - Messages are not queued or relayed. Delivery is whatever the
//!   [`PostOffice`] does with them.
//!
//! ## Size Limits
//!
//! The server enforces RFC 821 size limits:
//! - User names: 64 characters max
//! - Domain names: 255 characters max
//! - Paths: 256 characters max
//! - Command lines: 512 characters max
//! - Text lines: 1000 characters max
//! - Recipients: 100 max per message
//! - Message data: 10 MiB max

pub mod config;
pub mod dkim;
pub mod dns;
pub mod mail;
pub mod smtp;
pub mod spf;

pub use config::ServerConfig;
pub use dkim::{DkimResult, DkimStatus, DkimVerifier};
pub use dns::{DnsError, DnsResolver, HickoryResolver, MockResolver};
pub use mail::{ConsolePostOffice, Envelope, ParsedAddress, PartPath, PostOffice};
pub use smtp::{SmtpError, SmtpLimits, SmtpResponse, SmtpServer, SmtpSession, SmtpState};
pub use spf::{SpfEvaluator, SpfResult};
