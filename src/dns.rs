//! DNS lookups used by DKIM key retrieval and SPF evaluation

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::system_conf::read_system_conf;
use hickory_resolver::Resolver;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    /// Transient failure (timeout, SERVFAIL, no reachable server)
    #[error("DNS lookup for {name} failed: {reason}")]
    LookupFailed { name: String, reason: String },
}

/// Blocking DNS capability
///
/// `Ok` with an empty set means the name has no such record. `Err` is kept for
/// failures where the answer is unknown.
pub trait DnsResolver: Send + Sync {
    fn query_txt(&self, name: &str) -> Result<Vec<String>, DnsError>;
    fn query_a(&self, name: &str) -> Result<Vec<Ipv4Addr>, DnsError>;
    fn query_aaaa(&self, name: &str) -> Result<Vec<Ipv6Addr>, DnsError>;
    /// `(preference, exchange)` pairs, lowest preference first
    fn query_mx(&self, name: &str) -> Result<Vec<(u16, String)>, DnsError>;
}

/// Resolver backed by `hickory-resolver`, using the system name servers
pub struct HickoryResolver {
    resolver: Resolver,
}

impl HickoryResolver {
    /// Build from the system configuration with the given per-query timeout
    /// and attempt count
    pub fn from_system_conf(timeout: Duration, attempts: usize) -> std::io::Result<Self> {
        let (config, opts) = match read_system_conf() {
            Ok(conf) => conf,
            Err(e) => {
                warn!("Could not read system DNS configuration, using defaults: {e}");
                (ResolverConfig::default(), ResolverOpts::default())
            }
        };
        Self::with_config(config, opts, timeout, attempts)
    }

    pub fn with_config(
        config: ResolverConfig,
        mut opts: ResolverOpts,
        timeout: Duration,
        attempts: usize,
    ) -> std::io::Result<Self> {
        opts.timeout = timeout;
        opts.attempts = attempts;
        let resolver = Resolver::new(config, opts)?;
        Ok(Self { resolver })
    }

    fn fqdn(name: &str) -> String {
        if name.ends_with('.') {
            name.to_owned()
        } else {
            format!("{name}.")
        }
    }

    /// Absent records are an empty answer, everything else is a failure
    fn classify<T>(name: &str, result: Result<Vec<T>, ResolveError>) -> Result<Vec<T>, DnsError> {
        match result {
            Ok(records) => Ok(records),
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => {
                    debug!("No records for {name}");
                    Ok(Vec::new())
                }
                _ => Err(DnsError::LookupFailed {
                    name: name.to_owned(),
                    reason: e.to_string(),
                }),
            },
        }
    }
}

impl DnsResolver for HickoryResolver {
    fn query_txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
        let result = self.resolver.txt_lookup(Self::fqdn(name)).map(|lookup| {
            lookup
                .iter()
                .map(|txt| {
                    txt.txt_data()
                        .iter()
                        .map(|chunk| String::from_utf8_lossy(chunk))
                        .collect::<String>()
                })
                .collect()
        });
        Self::classify(name, result)
    }

    fn query_a(&self, name: &str) -> Result<Vec<Ipv4Addr>, DnsError> {
        let result = self
            .resolver
            .ipv4_lookup(Self::fqdn(name))
            .map(|lookup| lookup.iter().map(|a| a.0).collect());
        Self::classify(name, result)
    }

    fn query_aaaa(&self, name: &str) -> Result<Vec<Ipv6Addr>, DnsError> {
        let result = self
            .resolver
            .ipv6_lookup(Self::fqdn(name))
            .map(|lookup| lookup.iter().map(|aaaa| aaaa.0).collect());
        Self::classify(name, result)
    }

    fn query_mx(&self, name: &str) -> Result<Vec<(u16, String)>, DnsError> {
        let result = self.resolver.mx_lookup(Self::fqdn(name)).map(|lookup| {
            let mut records: Vec<(u16, String)> = lookup
                .iter()
                .map(|mx| {
                    let exchange = mx.exchange().to_utf8();
                    (mx.preference(), exchange.trim_end_matches('.').to_owned())
                })
                .collect();
            records.sort_by_key(|(preference, _)| *preference);
            records
        });
        Self::classify(name, result)
    }
}

/// In-memory resolver for tests and offline runs
///
/// Names are matched case-insensitively. Every query, answered or not, bumps
/// the query counter.
#[derive(Default)]
pub struct MockResolver {
    txt: Mutex<HashMap<String, Vec<String>>>,
    a: Mutex<HashMap<String, Vec<Ipv4Addr>>>,
    aaaa: Mutex<HashMap<String, Vec<Ipv6Addr>>>,
    mx: Mutex<HashMap<String, Vec<(u16, String)>>>,
    failing: Mutex<HashSet<String>>,
    queries: AtomicUsize,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_txt(&self, name: &str, record: &str) {
        locked(&self.txt).entry(key(name)).or_default().push(record.to_owned());
    }

    pub fn add_a(&self, name: &str, addr: Ipv4Addr) {
        locked(&self.a).entry(key(name)).or_default().push(addr);
    }

    pub fn add_aaaa(&self, name: &str, addr: Ipv6Addr) {
        locked(&self.aaaa).entry(key(name)).or_default().push(addr);
    }

    pub fn add_mx(&self, name: &str, preference: u16, exchange: &str) {
        let mut mx = locked(&self.mx);
        let records = mx.entry(key(name)).or_default();
        records.push((preference, exchange.to_owned()));
        records.sort_by_key(|(preference, _)| *preference);
    }

    /// Make every lookup of `name` fail as if the server timed out
    pub fn fail(&self, name: &str) {
        locked(&self.failing).insert(key(name));
    }

    /// Number of queries answered so far
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn lookup<T: Clone>(
        &self,
        table: &Mutex<HashMap<String, Vec<T>>>,
        name: &str,
    ) -> Result<Vec<T>, DnsError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let name = key(name);
        if locked(&self.failing).contains(&name) {
            return Err(DnsError::LookupFailed {
                name,
                reason: "simulated timeout".to_owned(),
            });
        }
        Ok(locked(table).get(&name).cloned().unwrap_or_default())
    }
}

impl DnsResolver for MockResolver {
    fn query_txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
        self.lookup(&self.txt, name)
    }

    fn query_a(&self, name: &str) -> Result<Vec<Ipv4Addr>, DnsError> {
        self.lookup(&self.a, name)
    }

    fn query_aaaa(&self, name: &str) -> Result<Vec<Ipv6Addr>, DnsError> {
        self.lookup(&self.aaaa, name)
    }

    fn query_mx(&self, name: &str) -> Result<Vec<(u16, String)>, DnsError> {
        self.lookup(&self.mx, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_resolver_txt() {
        let resolver = MockResolver::new();
        resolver.add_txt("Example.com", "v=spf1 -all");

        assert_eq!(resolver.query_txt("example.com.").unwrap(), vec!["v=spf1 -all"]);
        assert!(resolver.query_txt("other.com").unwrap().is_empty());
        assert_eq!(resolver.query_count(), 2);
    }

    #[test]
    fn test_mock_resolver_mx_sorted() {
        let resolver = MockResolver::new();
        resolver.add_mx("example.com", 20, "backup.example.com");
        resolver.add_mx("example.com", 10, "mail.example.com");

        let mx = resolver.query_mx("example.com").unwrap();
        assert_eq!(mx[0], (10, "mail.example.com".to_owned()));
        assert_eq!(mx[1], (20, "backup.example.com".to_owned()));
    }

    #[test]
    fn test_mock_resolver_failure_is_distinct_from_absence() {
        let resolver = MockResolver::new();
        resolver.fail("broken.example");

        assert!(matches!(
            resolver.query_a("broken.example"),
            Err(DnsError::LookupFailed { .. })
        ));
        assert_eq!(resolver.query_a("missing.example"), Ok(Vec::new()));
    }

    #[test]
    fn test_fqdn() {
        assert_eq!(HickoryResolver::fqdn("example.com"), "example.com.");
        assert_eq!(HickoryResolver::fqdn("example.com."), "example.com.");
    }
}
