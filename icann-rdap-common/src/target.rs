//! The query target type: a validated, canonicalized domain, IP address, or
//! ASN, plus its cache key (spec §3.1/§3.2).

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::validators::{
    self, is_unsafe_ip, normalize_asn, normalize_domain, normalize_ipv4, normalize_ipv6,
    ValidationError,
};

/// The kind of entity an RDAP query resolves, used for cache-key prefixing
/// and bootstrap registry selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum QueryType {
    Domain,
    Ipv4,
    Ipv6,
    Asn,
}

/// A validated, canonical query target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    Domain(String),
    Ipv4(String),
    Ipv6(String),
    Asn(u32),
}

impl Target {
    /// Validates and canonicalizes a domain name.
    pub fn domain(input: &str) -> Result<Self, ValidationError> {
        Ok(Self::Domain(normalize_domain(input)?))
    }

    /// Validates and canonicalizes an IPv4 address.
    pub fn ipv4(input: &str) -> Result<Self, ValidationError> {
        Ok(Self::Ipv4(normalize_ipv4(input)?))
    }

    /// Validates and canonicalizes an IPv6 address.
    pub fn ipv6(input: &str) -> Result<Self, ValidationError> {
        Ok(Self::Ipv6(normalize_ipv6(input)?))
    }

    /// Validates and canonicalizes an ASN.
    pub fn asn(input: &str) -> Result<Self, ValidationError> {
        let canonical = normalize_asn(input)?;
        let digits = &canonical[2..];
        Ok(Self::Asn(digits.parse().expect("normalize_asn guarantees digits")))
    }

    /// Parses `input` against every target kind in turn, preferring the most
    /// specific interpretation (IPv4/IPv6/ASN literal syntax before falling
    /// back to a domain name).
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        if let Ok(ip) = input.parse::<IpAddr>() {
            return match ip {
                IpAddr::V4(_) => Self::ipv4(input),
                IpAddr::V6(_) => Self::ipv6(input),
            };
        }
        if input.len() >= 2 && input[..2].eq_ignore_ascii_case("as") {
            if let Ok(target) = Self::asn(input) {
                return Ok(target);
            }
        }
        Self::domain(input)
    }

    pub fn query_type(&self) -> QueryType {
        match self {
            Self::Domain(_) => QueryType::Domain,
            Self::Ipv4(_) => QueryType::Ipv4,
            Self::Ipv6(_) => QueryType::Ipv6,
            Self::Asn(_) => QueryType::Asn,
        }
    }

    /// The canonical `{query_type}:{canonical_value}` cache key (spec §3.2).
    /// Always lowercase; domains and IP literals are already lowercase from
    /// normalization, and the ASN variant is formatted as `asNNNN`.
    pub fn cache_key(&self) -> String {
        match self {
            Self::Domain(d) => format!("domain:{d}"),
            Self::Ipv4(ip) => format!("ipv4:{ip}"),
            Self::Ipv6(ip) => format!("ipv6:{ip}"),
            Self::Asn(n) => format!("asn:as{n}"),
        }
    }

    /// The underlying IP address, if this target is an IP literal.
    pub fn as_ip(&self) -> Option<IpAddr> {
        match self {
            Self::Ipv4(ip) => ip.parse().ok(),
            Self::Ipv6(ip) => ip.parse().ok(),
            _ => None,
        }
    }

    /// True if this target is an IP literal falling into any of the
    /// guarded categories in spec §4.1 (private, loopback, link-local,
    /// multicast, or reserved).
    pub fn is_unsafe_literal(&self) -> bool {
        self.as_ip().is_some_and(|ip| is_unsafe_ip(&ip))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain(d) => write!(f, "{d}"),
            Self::Ipv4(ip) => write!(f, "{ip}"),
            Self::Ipv6(ip) => write!(f, "{ip}"),
            Self::Asn(n) => write!(f, "AS{n}"),
        }
    }
}

/// Re-exported for callers that only need the classification predicates
/// without constructing a [`Target`].
pub use validators::{is_link_local_ip, is_loopback_ip, is_multicast_ip, is_private_ip, is_reserved_ip};

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;

    #[test]
    fn GIVEN_domain_input_WHEN_parse_THEN_domain_target() {
        let target = Target::parse("Example.COM.").unwrap();
        assert_eq!(target, Target::Domain("example.com".to_string()));
        assert_eq!(target.cache_key(), "domain:example.com");
    }

    #[test]
    fn GIVEN_ipv4_input_WHEN_parse_THEN_ipv4_target() {
        let target = Target::parse("192.0.2.1").unwrap();
        assert_eq!(target, Target::Ipv4("192.0.2.1".to_string()));
        assert_eq!(target.cache_key(), "ipv4:192.0.2.1");
    }

    #[test]
    fn GIVEN_ipv6_input_WHEN_parse_THEN_ipv6_target() {
        let target = Target::parse("2001:DB8::1").unwrap();
        assert_eq!(target.query_type(), QueryType::Ipv6);
    }

    #[test]
    fn GIVEN_asn_input_WHEN_parse_THEN_asn_target() {
        let target = Target::parse("AS16509").unwrap();
        assert_eq!(target, Target::Asn(16509));
        assert_eq!(target.cache_key(), "asn:as16509");
    }

    #[test]
    fn GIVEN_private_ip_WHEN_is_unsafe_literal_THEN_true() {
        let target = Target::ipv4("10.0.0.1").unwrap();
        assert!(target.is_unsafe_literal());
    }

    #[test]
    fn GIVEN_public_ip_WHEN_is_unsafe_literal_THEN_false() {
        let target = Target::ipv4("93.184.216.34").unwrap();
        assert!(!target.is_unsafe_literal());
    }

    #[test]
    fn GIVEN_domain_target_WHEN_is_unsafe_literal_THEN_false() {
        let target = Target::domain("example.com").unwrap();
        assert!(!target.is_unsafe_literal());
    }

    #[test]
    fn GIVEN_malformed_domain_WHEN_parse_THEN_error() {
        assert!(Target::parse("not a domain!!").is_err());
    }
}
