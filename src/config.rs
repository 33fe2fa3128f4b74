//! Server configuration

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name announced in the banner and HELO reply
    pub hostname: String,
    pub bind_addr: String,
    /// How long one read may wait for client input
    pub read_timeout: Duration,
    /// Consecutive timed out reads before the connection is closed
    pub max_idle_reads: u32,
    /// Serve each connection on its own thread instead of one after another
    pub concurrent: bool,
    pub dns_timeout: Duration,
    pub dns_attempts: usize,
}

impl ServerConfig {
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_owned(),
            ..Self::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_owned(),
            bind_addr: "0.0.0.0:25".to_owned(),
            read_timeout: Duration::from_secs(5),
            max_idle_reads: 2,
            concurrent: false,
            dns_timeout: Duration::from_secs(1),
            dns_attempts: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::new("mx.example.com");
        assert_eq!(config.hostname, "mx.example.com");
        assert_eq!(config.bind_addr, "0.0.0.0:25");
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.max_idle_reads, 2);
        assert!(!config.concurrent);
        assert_eq!(config.dns_attempts, 1);
    }
}
