//! SMTP protocol: command parsing, session state and the connection loop

pub mod commands;
pub mod error;
pub mod response;
pub mod server;
pub mod session;

pub use commands::{SmtpCommand, SmtpCommandHandler};
pub use error::{SmtpError, SmtpLimits};
pub use response::SmtpResponse;
pub use server::SmtpServer;
pub use session::{CommandKind, SmtpSession, SmtpState};
