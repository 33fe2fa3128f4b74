//! SMTP server implementation

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{IpAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::dns::DnsResolver;
use crate::mail::PostOffice;
use crate::smtp::commands::SmtpCommandHandler;
use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::SmtpSession;

/// Accepts connections, runs the protocol and hands each finalized message
/// to a [`PostOffice`]
#[derive(Clone)]
pub struct SmtpServer {
    config: ServerConfig,
    resolver: Arc<dyn DnsResolver>,
}

impl SmtpServer {
    pub fn new(config: ServerConfig, resolver: Arc<dyn DnsResolver>) -> Self {
        Self { config, resolver }
    }

    pub fn hostname(&self) -> &str {
        &self.config.hostname
    }

    /// Bind `bind_addr` from the configuration and serve forever
    pub fn start(&self, post_office: impl PostOffice + 'static) -> Result<(), SmtpError> {
        let listener = TcpListener::bind(&self.config.bind_addr)?;
        self.start_with_listener(listener, post_office)
    }

    /// Serve connections from an existing listener (blocking)
    pub fn start_with_listener(
        &self,
        listener: TcpListener,
        post_office: impl PostOffice + 'static,
    ) -> Result<(), SmtpError> {
        info!("SMTP server listening on {}", listener.local_addr()?);

        let post_office: Arc<dyn PostOffice> = Arc::new(post_office);

        for stream in listener.incoming() {
            match stream {
                Ok(stream) if self.config.concurrent => {
                    let server = self.clone();
                    let post_office = Arc::clone(&post_office);
                    thread::spawn(move || server.serve(stream, post_office.as_ref()));
                }
                Ok(stream) => self.serve(stream, post_office.as_ref()),
                Err(e) => {
                    warn!("Error accepting connection: {e}");
                }
            }
        }

        Ok(())
    }

    fn serve(&self, stream: TcpStream, post_office: &dyn PostOffice) {
        let peer = stream
            .peer_addr()
            .map_or_else(|_| "unknown".to_owned(), |addr| addr.to_string());
        info!("Connection from {peer}");

        if let Err(e) = self.handle_client(stream, post_office) {
            warn!("Error handling client {peer}: {e}");
        }
        debug!("Connection from {peer} closed");
    }

    /// Run one connection to completion
    fn handle_client(
        &self,
        mut stream: TcpStream,
        post_office: &dyn PostOffice,
    ) -> Result<(), SmtpError> {
        let peer_ip: Option<IpAddr> = stream.peer_addr().ok().map(|addr| addr.ip().to_canonical());
        stream.set_read_timeout(Some(self.config.read_timeout))?;

        let command_handler = SmtpCommandHandler::new(&self.config.hostname);
        let mut session = SmtpSession::new(peer_ip);
        let mut reader = BufReader::new(stream.try_clone()?);

        self.send_response(&mut stream, &SmtpResponse::greeting(&self.config.hostname))?;

        // Bytes of a partial line survive a timed out read
        let mut line_buffer = Vec::new();
        let mut idle_reads = 0;

        loop {
            match reader.read_until(b'\n', &mut line_buffer) {
                Ok(0) => break,
                Ok(_) => idle_reads = 0,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    idle_reads += 1;
                    if session.received_end_of_data || idle_reads >= self.config.max_idle_reads {
                        debug!("Client idle, closing");
                        self.send_response(&mut stream, &SmtpResponse::quit())?;
                        break;
                    }
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            let raw_line = std::mem::take(&mut line_buffer);
            let line = strip_line_ending(&raw_line);

            if session.in_data_mode() {
                if line == b"." {
                    self.send_response(&mut stream, &SmtpResponse::ok())?;
                    self.deliver(&mut session, post_office)?;
                } else if let Err(e) = session.add_data_line(line) {
                    self.send_error(&mut stream, &e)?;
                    break;
                }
                continue;
            }

            let command = String::from_utf8_lossy(line);
            let command = command.trim();
            if command.is_empty() {
                continue;
            }
            debug!("C: {command}");

            match command_handler.process_command(command, &mut session) {
                Ok(response) => {
                    self.send_response(&mut stream, &response)?;
                    if response.is_closing() {
                        break;
                    }
                }
                Err(SmtpError::UnrecognizedCommand) => {
                    info!("Unrecognized command {command:?}, closing connection");
                    break;
                }
                Err(e) => {
                    self.send_error(&mut stream, &e)?;
                    if !e.is_recoverable() {
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Finalize the collected message and pass it on
    fn deliver(
        &self,
        session: &mut SmtpSession,
        post_office: &dyn PostOffice,
    ) -> Result<(), SmtpError> {
        let mut envelope = session.finish_data_collection()?;
        debug!("End of data, {} bytes", envelope.raw_body.len());

        envelope.finalize(self.resolver.as_ref());
        info!(dkim = %envelope.dkim, spf = %envelope.spf, "Message received");

        post_office.on_mail_dropped_off(envelope);
        Ok(())
    }

    fn send_error(&self, stream: &mut TcpStream, error: &SmtpError) -> Result<(), SmtpError> {
        let response = SmtpResponse::error(error.to_response_code(), &error.to_response_message());
        self.send_response(stream, &response)
    }

    fn send_response(
        &self,
        stream: &mut TcpStream,
        response: &SmtpResponse,
    ) -> Result<(), SmtpError> {
        let formatted = response.format();
        debug!("S: {}", formatted.trim_end());

        if response.multiline.is_none() && formatted.len() > SmtpLimits::REPLY_LINE_MAX_LENGTH {
            let truncated_response =
                SmtpResponse::new(&response.code, "Response too long (truncated)");
            stream.write_all(truncated_response.format().as_bytes())?;
        } else {
            stream.write_all(formatted.as_bytes())?;
        }
        stream.flush()?;
        Ok(())
    }
}

/// Drop `\n` or `\r\n`; bare LF lines are accepted
fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::MockResolver;
    use crate::mail::Envelope;
    use std::sync::mpsc;
    use std::time::Duration;

    fn start_test_server(config: ServerConfig) -> (String, mpsc::Receiver<Envelope>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = SmtpServer::new(config, Arc::new(MockResolver::new()));
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            if let Err(e) = server.start_with_listener(listener, tx) {
                eprintln!("Error starting server: {e}");
            }
        });

        (addr, rx)
    }

    fn connect(addr: &str) -> (TcpStream, BufReader<TcpStream>) {
        let stream = TcpStream::connect(addr).unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut greeting = String::new();
        reader.read_line(&mut greeting).unwrap();
        assert!(greeting.starts_with("220 test.local"));
        (stream, reader)
    }

    fn send_command(
        stream: &mut TcpStream,
        reader: &mut BufReader<TcpStream>,
        command: &str,
    ) -> String {
        write!(stream, "{command}\r\n").unwrap();
        stream.flush().unwrap();

        let mut response = String::new();
        reader.read_line(&mut response).unwrap();
        response.trim().to_string()
    }

    #[test]
    fn test_strip_line_ending() {
        assert_eq!(strip_line_ending(b"abc\r\n"), b"abc");
        assert_eq!(strip_line_ending(b"abc\n"), b"abc");
        assert_eq!(strip_line_ending(b"abc"), b"abc");
        assert_eq!(strip_line_ending(b"\r\n"), b"");
    }

    #[test]
    fn test_server_creation() {
        let server = SmtpServer::new(
            ServerConfig::new("test.local"),
            Arc::new(MockResolver::new()),
        );
        assert_eq!(server.hostname(), "test.local");
    }

    #[test]
    fn test_complete_smtp_session() {
        let (addr, rx) = start_test_server(ServerConfig::new("test.local"));
        let (mut stream, mut reader) = connect(&addr);

        assert!(send_command(&mut stream, &mut reader, "HELO client.local").starts_with("250"));
        assert_eq!(
            send_command(&mut stream, &mut reader, "MAIL FROM:<test@example.com>"),
            "250 Ok"
        );
        assert_eq!(
            send_command(&mut stream, &mut reader, "RCPT TO:<recipient@example.com>"),
            "250 Ok"
        );
        assert_eq!(
            send_command(&mut stream, &mut reader, "DATA"),
            "354 End data with <CR><LF>.<CR><LF>"
        );

        write!(stream, "Subject: Test Email\r\n\r\nThis is a test email.\r\n").unwrap();
        assert_eq!(send_command(&mut stream, &mut reader, "."), "250 Ok");
        assert_eq!(send_command(&mut stream, &mut reader, "QUIT"), "221 Bye");

        let envelope = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(envelope.sender.as_ref().unwrap().email, "test@example.com");
        assert!(envelope.has_recipient("recipient@example.com"));
        assert_eq!(envelope.subject(), "Test Email");
        assert_eq!(envelope.body_text(), "This is a test email.\r\n");
        assert_eq!(envelope.client_domain.as_deref(), Some("client.local"));
        assert!(envelope.peer_ip.unwrap().is_loopback());
    }

    #[test]
    fn test_unrecognized_command_closes_silently() {
        let (addr, _rx) = start_test_server(ServerConfig::new("test.local"));
        let (mut stream, mut reader) = connect(&addr);

        write!(stream, "VRFY someone\r\n").unwrap();
        stream.flush().unwrap();

        let mut response = String::new();
        assert_eq!(reader.read_line(&mut response).unwrap(), 0);
    }

    #[test]
    fn test_bad_sequence_keeps_connection() {
        let (addr, _rx) = start_test_server(ServerConfig::new("test.local"));
        let (mut stream, mut reader) = connect(&addr);

        let response = send_command(&mut stream, &mut reader, "MAIL FROM:<test@example.com>");
        assert!(response.starts_with("503"));
        assert!(send_command(&mut stream, &mut reader, "NOOP").starts_with("250"));
        assert_eq!(send_command(&mut stream, &mut reader, "QUIT"), "221 Bye");
    }

    #[test]
    fn test_idle_connection_is_closed() {
        let mut config = ServerConfig::new("test.local");
        config.read_timeout = Duration::from_millis(50);
        let (addr, _rx) = start_test_server(config);
        let (_stream, mut reader) = connect(&addr);

        let mut response = String::new();
        reader.read_line(&mut response).unwrap();
        assert_eq!(response, "221 Bye\r\n");

        response.clear();
        assert_eq!(reader.read_line(&mut response).unwrap(), 0);
    }
}
