//! Sender Policy Framework evaluation (RFC 7208, without macros)
//!
//! Every TXT, A, AAAA and MX lookup made while evaluating one sender is
//! charged to a single [`LookupBudget`], so records that `include` each other
//! end in `permfail` instead of looping.

pub mod cidr;
pub mod term;

use std::fmt;
use std::net::IpAddr;

use thiserror::Error;
use tracing::{debug, info};

use crate::dns::{DnsError, DnsResolver};
use cidr::{cidr_match, ip4_in_network, ip6_in_network, split_domain_spec};
use term::{parse_record, Qualifier, SpfTerm};

/// Lookups allowed for one `check_host` evaluation
pub const DNS_LOOKUP_LIMIT: usize = 10;

/// MX exchanges considered per `mx` mechanism
pub const MX_EXCHANGE_LIMIT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpfResult {
    #[default]
    None,
    Neutral,
    Pass,
    Fail,
    SoftFail,
    TempFail,
    PermFail,
}

impl fmt::Display for SpfResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SpfResult::None => "none",
            SpfResult::Neutral => "neutral",
            SpfResult::Pass => "pass",
            SpfResult::Fail => "fail",
            SpfResult::SoftFail => "softfail",
            SpfResult::TempFail => "tempfail",
            SpfResult::PermFail => "permfail",
        })
    }
}

impl From<Qualifier> for SpfResult {
    fn from(qualifier: Qualifier) -> Self {
        match qualifier {
            Qualifier::Pass => SpfResult::Pass,
            Qualifier::Fail => SpfResult::Fail,
            Qualifier::SoftFail => SpfResult::SoftFail,
            Qualifier::Neutral => SpfResult::Neutral,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpfError {
    #[error("DNS lookup limit exceeded")]
    LookupLimitExceeded,

    #[error(transparent)]
    Dns(#[from] DnsError),

    #[error("invalid SPF record: {0}")]
    InvalidRecord(String),
}

impl SpfError {
    pub fn to_result(&self) -> SpfResult {
        match self {
            SpfError::Dns(_) => SpfResult::TempFail,
            SpfError::LookupLimitExceeded | SpfError::InvalidRecord(_) => SpfResult::PermFail,
        }
    }
}

/// DNS lookups spent by one evaluation tree
#[derive(Debug, Default)]
pub struct LookupBudget {
    used: usize,
}

impl LookupBudget {
    pub fn charge(&mut self) -> Result<(), SpfError> {
        if self.used >= DNS_LOOKUP_LIMIT {
            return Err(SpfError::LookupLimitExceeded);
        }
        self.used += 1;
        Ok(())
    }

    pub fn used(&self) -> usize {
        self.used
    }
}

pub struct SpfEvaluator<'a> {
    resolver: &'a dyn DnsResolver,
}

impl<'a> SpfEvaluator<'a> {
    pub fn new(resolver: &'a dyn DnsResolver) -> Self {
        Self { resolver }
    }

    /// Evaluate the policy of `domain` for a message sent from `ip`
    ///
    /// IPv4-mapped IPv6 senders are evaluated as IPv4.
    pub fn check_host(&self, ip: IpAddr, domain: &str) -> SpfResult {
        let ip = ip.to_canonical();
        match self.domain_resolves(domain) {
            Ok(true) => {}
            Ok(false) => {
                debug!("SPF: {domain} does not resolve");
                return SpfResult::None;
            }
            Err(e) => {
                info!("SPF: {e}");
                return e.to_result();
            }
        }

        let mut budget = LookupBudget::default();
        let result = self
            .evaluate(ip, domain, &mut budget)
            .unwrap_or_else(|e| {
                info!("SPF evaluation for {domain} aborted: {e}");
                e.to_result()
            });
        debug!("SPF: {domain} -> {result} after {} lookups", budget.used());
        result
    }

    /// Probe made before evaluation; not charged to the budget
    fn domain_resolves(&self, domain: &str) -> Result<bool, SpfError> {
        if !self.resolver.query_a(domain)?.is_empty() {
            return Ok(true);
        }
        Ok(!self.resolver.query_aaaa(domain)?.is_empty())
    }

    fn fetch_record(
        &self,
        domain: &str,
        budget: &mut LookupBudget,
    ) -> Result<Option<String>, SpfError> {
        budget.charge()?;
        let records = self.resolver.query_txt(domain)?;
        Ok(records
            .into_iter()
            .find(|record| record.to_ascii_lowercase().contains("v=spf")))
    }

    fn evaluate(
        &self,
        ip: IpAddr,
        domain: &str,
        budget: &mut LookupBudget,
    ) -> Result<SpfResult, SpfError> {
        let terms = match self.fetch_record(domain, budget)? {
            Some(record) => parse_record(&record),
            None => Vec::new(),
        };

        for term in &terms {
            match term {
                SpfTerm::Mechanism {
                    qualifier,
                    name,
                    value,
                } => {
                    if self.mechanism_matches(ip, domain, name, value, budget)? {
                        debug!("SPF: {domain} matched {name}:{value}");
                        return Ok((*qualifier).into());
                    }
                }
                SpfTerm::Modifier { name, value } if name == "redirect" => {
                    if self.evaluate(ip, value, budget)? == SpfResult::Pass {
                        return Ok(SpfResult::Pass);
                    }
                }
                SpfTerm::Modifier { name, .. } => debug!("SPF: ignoring modifier {name}"),
            }
        }

        Ok(SpfResult::None)
    }

    fn mechanism_matches(
        &self,
        ip: IpAddr,
        domain: &str,
        name: &str,
        value: &str,
        budget: &mut LookupBudget,
    ) -> Result<bool, SpfError> {
        match name {
            "all" => Ok(true),
            "include" => {
                if value.is_empty() {
                    return Err(SpfError::InvalidRecord("include without a domain".to_owned()));
                }
                Ok(self.evaluate(ip, value, budget)? == SpfResult::Pass)
            }
            "ip4" | "ip6" => cidr_match(ip, value),
            "a" => {
                let (target, prefix4, prefix6) = split_domain_spec(value, domain)?;
                self.host_matches(ip, &target, prefix4, prefix6, budget)
            }
            "mx" => {
                let (target, prefix4, prefix6) = split_domain_spec(value, domain)?;
                budget.charge()?;
                let exchanges = self.resolver.query_mx(&target)?;
                for (_, exchange) in exchanges.iter().take(MX_EXCHANGE_LIMIT) {
                    if self.host_matches(ip, exchange, prefix4, prefix6, budget)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            "exists" => {
                if value.is_empty() {
                    return Err(SpfError::InvalidRecord("exists without a domain".to_owned()));
                }
                budget.charge()?;
                Ok(!self.resolver.query_a(value)?.is_empty())
            }
            "ptr" => {
                debug!("SPF: ptr mechanism is not supported, skipping");
                Ok(false)
            }
            other => Err(SpfError::InvalidRecord(format!("unknown mechanism {other:?}"))),
        }
    }

    /// Does any address of `host` cover `ip`
    fn host_matches(
        &self,
        ip: IpAddr,
        host: &str,
        prefix4: Option<u8>,
        prefix6: Option<u8>,
        budget: &mut LookupBudget,
    ) -> Result<bool, SpfError> {
        budget.charge()?;
        match ip {
            IpAddr::V4(ip) => {
                let prefix = prefix4.unwrap_or(32);
                Ok(self
                    .resolver
                    .query_a(host)?
                    .into_iter()
                    .any(|addr| ip4_in_network(ip, addr, prefix)))
            }
            IpAddr::V6(ip) => {
                let prefix = prefix6.unwrap_or(128);
                Ok(self
                    .resolver
                    .query_aaaa(host)?
                    .into_iter()
                    .any(|addr| ip6_in_network(ip, addr, prefix)))
            }
        }
    }
}
