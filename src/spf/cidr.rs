//! CIDR matching for `ip4`, `ip6`, `a` and `mx` terms

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::SpfError;

/// prefix=0 matches all, prefix>32 matches none
pub fn ip4_in_network(ip: Ipv4Addr, network: Ipv4Addr, prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    if prefix > 32 {
        return false;
    }
    let mask = !0u32 << (32 - prefix);
    (u32::from(ip) & mask) == (u32::from(network) & mask)
}

/// prefix=0 matches all, prefix>128 matches none
pub fn ip6_in_network(ip: Ipv6Addr, network: Ipv6Addr, prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    if prefix > 128 {
        return false;
    }
    let mask = !0u128 << (128 - prefix);
    (u128::from(ip) & mask) == (u128::from(network) & mask)
}

/// Match `ip` against an `ip4:`/`ip6:` range such as `192.0.2.0/24`
///
/// Without a prefix the addresses must be equal. A range of the other address
/// family never matches.
pub fn cidr_match(ip: IpAddr, range: &str) -> Result<bool, SpfError> {
    let (network, prefix) = match range.split_once('/') {
        Some((network, prefix)) => (network, Some(prefix)),
        None => (range, None),
    };
    let invalid = || SpfError::InvalidRecord(format!("bad network {range:?}"));
    let network: IpAddr = network.parse().map_err(|_| invalid())?;

    match (ip, network) {
        (IpAddr::V4(ip), IpAddr::V4(network)) => {
            let prefix = parse_prefix(prefix, 32).ok_or_else(invalid)?;
            Ok(ip4_in_network(ip, network, prefix))
        }
        (IpAddr::V6(ip), IpAddr::V6(network)) => {
            let prefix = parse_prefix(prefix, 128).ok_or_else(invalid)?;
            Ok(ip6_in_network(ip, network, prefix))
        }
        _ => Ok(false),
    }
}

fn parse_prefix(prefix: Option<&str>, max: u8) -> Option<u8> {
    match prefix {
        None => Some(max),
        Some(text) => text.parse::<u8>().ok().filter(|bits| *bits <= max),
    }
}

/// Split an `a`/`mx` argument into target domain and IPv4/IPv6 prefixes
///
/// Accepts `domain`, `/24`, `domain/24`, `//64` and `domain/24//64`. An empty
/// domain means `current_domain`.
pub fn split_domain_spec(
    value: &str,
    current_domain: &str,
) -> Result<(String, Option<u8>, Option<u8>), SpfError> {
    let (domain, cidr) = match value.find('/') {
        Some(pos) => (&value[..pos], &value[pos..]),
        None => (value, ""),
    };
    let domain = if domain.is_empty() {
        current_domain.to_owned()
    } else {
        domain.to_owned()
    };

    let invalid = || SpfError::InvalidRecord(format!("bad cidr length {cidr:?}"));
    let (v4, v6) = match cidr.strip_prefix("//") {
        Some(v6) => (None, Some(v6)),
        None => match cidr.strip_prefix('/') {
            Some(rest) => match rest.split_once("//") {
                Some((v4, v6)) => (Some(v4), Some(v6)),
                None => (Some(rest), None),
            },
            None => (None, None),
        },
    };

    let prefix4 = match v4 {
        Some(text) => Some(parse_prefix(Some(text), 32).ok_or_else(invalid)?),
        None => None,
    };
    let prefix6 = match v6 {
        Some(text) => Some(parse_prefix(Some(text), 128).ok_or_else(invalid)?),
        None => None,
    };

    Ok((domain, prefix4, prefix6))
}
