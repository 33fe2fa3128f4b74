use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use umimail::{ConsolePostOffice, HickoryResolver, ServerConfig, SmtpServer};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[clap(short, long, env = "UMIMAIL_BIND", default_value = "0.0.0.0:25")]
    bind: String,

    /// Name announced in the banner
    #[clap(long, env = "UMIMAIL_HOSTNAME", default_value = "localhost")]
    hostname: String,

    /// Seconds one read may wait for client input
    #[clap(long, env = "UMIMAIL_READ_TIMEOUT", default_value_t = 5)]
    read_timeout: u64,

    /// Consecutive idle reads before a connection is closed
    #[clap(long, env = "UMIMAIL_MAX_IDLE_READS", default_value_t = 2)]
    max_idle_reads: u32,

    /// Serve each connection on its own thread
    #[clap(long, env = "UMIMAIL_CONCURRENT")]
    concurrent: bool,

    /// Milliseconds before a DNS query is given up
    #[clap(long, env = "UMIMAIL_DNS_TIMEOUT_MS", default_value_t = 1000)]
    dns_timeout_ms: u64,

    /// Attempts per DNS query
    #[clap(long, env = "UMIMAIL_DNS_ATTEMPTS", default_value_t = 1)]
    dns_attempts: usize,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            hostname: self.hostname,
            bind_addr: self.bind,
            read_timeout: Duration::from_secs(self.read_timeout),
            max_idle_reads: self.max_idle_reads,
            concurrent: self.concurrent,
            dns_timeout: Duration::from_millis(self.dns_timeout_ms),
            dns_attempts: self.dns_attempts,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Args::parse().into_config();
    info!(
        hostname = %config.hostname,
        bind = %config.bind_addr,
        concurrent = config.concurrent,
        "Starting umimail"
    );

    let resolver = HickoryResolver::from_system_conf(config.dns_timeout, config.dns_attempts)
        .context("building DNS resolver")?;
    let bind_addr = config.bind_addr.clone();
    let server = SmtpServer::new(config, Arc::new(resolver));

    server
        .start(ConsolePostOffice)
        .with_context(|| format!("serving SMTP on {bind_addr}"))?;

    Ok(())
}
