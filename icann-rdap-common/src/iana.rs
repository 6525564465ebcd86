//! The IANA RDAP bootstrap registry data model and matching rules
//! (spec §3.3/§4.5).
//!
//! Matching here is deliberately simple and fail-closed: entries are tried
//! in document order and the first structural match wins. There is no
//! longest-prefix or longest-suffix preference pass; a service earlier in
//! the registry's `services` array always takes precedence over one later
//! in the same file, mirroring the ordering IANA itself publishes. A
//! malformed CIDR or AS-range entry is skipped rather than causing the
//! whole registry to be treated as unusable.

use ipnet::{Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum IanaRegistryType {
    RdapBootstrapDns,
    RdapBootstrapAsn,
    RdapBootstrapIpv4,
    RdapBootstrapIpv6,
}

impl IanaRegistryType {
    pub fn url(&self) -> &str {
        match self {
            IanaRegistryType::RdapBootstrapDns => "https://data.iana.org/rdap/dns.json",
            IanaRegistryType::RdapBootstrapAsn => "https://data.iana.org/rdap/asn.json",
            IanaRegistryType::RdapBootstrapIpv4 => "https://data.iana.org/rdap/ipv4.json",
            IanaRegistryType::RdapBootstrapIpv6 => "https://data.iana.org/rdap/ipv6.json",
        }
    }

    pub fn file_name(&self) -> &str {
        self.url()
            .rsplit('/')
            .next()
            .expect("registry urls always have a path segment")
    }
}

/// A parsed IANA bootstrap registry file (dns.json, asn.json, ipv4.json, or
/// ipv6.json). All four share the same `{version, publication, services}`
/// shape; `services` entries differ only in what the first column holds
/// (TLD labels, AS ranges, or CIDRs).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RdapBootstrapRegistry {
    pub version: String,
    pub publication: String,
    pub description: Option<String>,
    pub services: Vec<Vec<Vec<String>>>,
}

pub trait BootstrapRegistry {
    fn get_dns_bootstrap_urls(&self, ldh: &str) -> Result<Vec<String>, BootstrapRegistryError>;
    fn get_asn_bootstrap_urls(&self, asn: &str) -> Result<Vec<String>, BootstrapRegistryError>;
    fn get_ipv4_bootstrap_urls(&self, ipv4: &str) -> Result<Vec<String>, BootstrapRegistryError>;
    fn get_ipv6_bootstrap_urls(&self, ipv6: &str) -> Result<Vec<String>, BootstrapRegistryError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BootstrapRegistryError {
    #[error("empty service entry")]
    EmptyService,
    #[error("empty url set")]
    EmptyUrlSet,
    #[error("invalid bootstrap input")]
    InvalidBootstrapInput,
    #[error("no bootstrap urls found")]
    NoBootstrapUrls,
    #[error("invalid bootstrap service")]
    InvalidBootstrapService,
}

impl BootstrapRegistry for RdapBootstrapRegistry {
    fn get_dns_bootstrap_urls(&self, ldh: &str) -> Result<Vec<String>, BootstrapRegistryError> {
        // Spec §4.4: the TLD is the rightmost non-empty label, matched verbatim
        // against an entry's patterns -- no suffix chain, no longest-match pass.
        let tld = ldh.rsplit('.').next().unwrap_or(ldh).to_ascii_lowercase();
        for service in &self.services {
            let tlds = service.first().ok_or(BootstrapRegistryError::EmptyService)?;
            for pattern in tlds {
                if pattern.is_empty() || pattern.eq_ignore_ascii_case(&tld) {
                    let urls = service.last().ok_or(BootstrapRegistryError::EmptyUrlSet)?;
                    return Ok(urls.to_owned());
                }
            }
        }
        Err(BootstrapRegistryError::NoBootstrapUrls)
    }

    fn get_asn_bootstrap_urls(&self, asn: &str) -> Result<Vec<String>, BootstrapRegistryError> {
        let autnum = asn
            .trim_start_matches(|c| matches!(c, 'a' | 'A' | 's' | 'S'))
            .parse::<u32>()
            .map_err(|_| BootstrapRegistryError::InvalidBootstrapInput)?;
        for service in &self.services {
            let ranges = service.first().ok_or(BootstrapRegistryError::EmptyService)?;
            for range in ranges {
                let Some((start, end)) = parse_as_range(range) else {
                    continue;
                };
                if start <= autnum && autnum <= end {
                    let urls = service.last().ok_or(BootstrapRegistryError::EmptyUrlSet)?;
                    return Ok(urls.to_owned());
                }
            }
        }
        Err(BootstrapRegistryError::NoBootstrapUrls)
    }

    fn get_ipv4_bootstrap_urls(&self, ipv4: &str) -> Result<Vec<String>, BootstrapRegistryError> {
        let needle: Ipv4Net = as_v4_net(ipv4).ok_or(BootstrapRegistryError::InvalidBootstrapInput)?;
        for service in &self.services {
            let cidrs = service.first().ok_or(BootstrapRegistryError::EmptyService)?;
            for cidr in cidrs {
                let Some(net) = as_v4_net(cidr) else {
                    continue;
                };
                if net.contains(&needle) {
                    let urls = service.last().ok_or(BootstrapRegistryError::EmptyUrlSet)?;
                    return Ok(urls.to_owned());
                }
            }
        }
        Err(BootstrapRegistryError::NoBootstrapUrls)
    }

    fn get_ipv6_bootstrap_urls(&self, ipv6: &str) -> Result<Vec<String>, BootstrapRegistryError> {
        let needle: Ipv6Net = as_v6_net(ipv6).ok_or(BootstrapRegistryError::InvalidBootstrapInput)?;
        for service in &self.services {
            let cidrs = service.first().ok_or(BootstrapRegistryError::EmptyService)?;
            for cidr in cidrs {
                let Some(net) = as_v6_net(cidr) else {
                    continue;
                };
                if net.contains(&needle) {
                    let urls = service.last().ok_or(BootstrapRegistryError::EmptyUrlSet)?;
                    return Ok(urls.to_owned());
                }
            }
        }
        Err(BootstrapRegistryError::NoBootstrapUrls)
    }
}

fn parse_as_range(range: &str) -> Option<(u32, u32)> {
    match range.split_once('-') {
        Some((start, end)) => Some((start.parse().ok()?, end.parse().ok()?)),
        None => {
            let n = range.parse().ok()?;
            Some((n, n))
        }
    }
}

/// Parses a bootstrap IPv4 pattern, treating a bare address (no `/`) as `/32`.
fn as_v4_net(pattern: &str) -> Option<Ipv4Net> {
    if pattern.contains('/') {
        pattern.parse().ok()
    } else {
        pattern.parse::<std::net::Ipv4Addr>().ok().map(|a| Ipv4Net::new(a, 32).expect("/32 always valid"))
    }
}

/// Parses a bootstrap IPv6 pattern, treating a bare address (no `/`) as `/128`.
fn as_v6_net(pattern: &str) -> Option<Ipv6Net> {
    if pattern.contains('/') {
        pattern.parse().ok()
    } else {
        pattern.parse::<std::net::Ipv6Addr>().ok().map(|a| Ipv6Net::new(a, 128).expect("/128 always valid"))
    }
}

/// Prefers an HTTPS url over a plain-HTTP one; falls back to the first
/// entry if none is HTTPS.
pub fn get_preferred_url(urls: Vec<String>) -> Result<String, BootstrapRegistryError> {
    if urls.is_empty() {
        return Err(BootstrapRegistryError::EmptyUrlSet);
    }
    let url = urls
        .iter()
        .find(|s| s.starts_with("https://"))
        .unwrap_or_else(|| urls.first().unwrap());
    Ok(url.to_owned())
}
