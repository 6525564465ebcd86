//! Pure, I/O-free validation and canonicalization of query targets (spec §4.1, C1).
//!
//! Validators never perform I/O and never panic on well-formed input.
//! Normalizers are idempotent: `normalize(normalize(x)) == normalize(x)`.
//! Character classification here is ASCII-only; IDN labels are expected to
//! already be A-label (Punycode) encoded by the caller.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

use regex::Regex;
use strum_macros::Display;
use thiserror::Error;

/// Which kind of target a [`ValidationError`] was raised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TargetKind {
    Domain,
    Ipv4,
    Ipv6,
    Asn,
}

/// A rejected, malformed query target.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} validation failed for {input:?}: {reason}")]
pub struct ValidationError {
    pub kind: TargetKind,
    pub input: String,
    pub reason: String,
}

impl ValidationError {
    fn new(kind: TargetKind, input: &str, reason: impl fmt::Display) -> Self {
        Self {
            kind,
            input: input.to_string(),
            reason: reason.to_string(),
        }
    }
}

const MAX_DOMAIN_OCTETS: usize = 253;
const MAX_LABEL_OCTETS: usize = 63;

static LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]*[A-Za-z0-9])?$").unwrap());

/// Validates a domain name per spec §3.1 and returns its canonical form:
/// lowercase, with any single trailing dot removed.
pub fn validate_domain(input: &str) -> Result<String, ValidationError> {
    let trimmed = input.trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(ValidationError::new(
            TargetKind::Domain,
            input,
            "empty domain",
        ));
    }
    if trimmed.len() > MAX_DOMAIN_OCTETS {
        return Err(ValidationError::new(
            TargetKind::Domain,
            input,
            format!("domain exceeds {MAX_DOMAIN_OCTETS} octets"),
        ));
    }
    for label in trimmed.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_OCTETS {
            return Err(ValidationError::new(
                TargetKind::Domain,
                input,
                format!("label {label:?} has invalid length"),
            ));
        }
        if !LABEL_RE.is_match(label) {
            return Err(ValidationError::new(
                TargetKind::Domain,
                input,
                format!("label {label:?} contains invalid characters or leading/trailing hyphen"),
            ));
        }
    }
    Ok(trimmed.to_ascii_lowercase())
}

/// Idempotent canonicalization wrapper around [`validate_domain`].
pub fn normalize_domain(input: &str) -> Result<String, ValidationError> {
    validate_domain(input)
}

/// Validates an IPv4 dotted-quad address.
pub fn validate_ipv4(input: &str) -> Result<Ipv4Addr, ValidationError> {
    if input.contains(' ') {
        return Err(ValidationError::new(
            TargetKind::Ipv4,
            input,
            "embedded whitespace",
        ));
    }
    input
        .parse::<Ipv4Addr>()
        .map_err(|e| ValidationError::new(TargetKind::Ipv4, input, e))
}

/// Canonical textual form of an IPv4 address (dotted-quad).
pub fn normalize_ipv4(input: &str) -> Result<String, ValidationError> {
    Ok(validate_ipv4(input)?.to_string())
}

/// Validates an IPv6 address in RFC 4291 textual form.
pub fn validate_ipv6(input: &str) -> Result<Ipv6Addr, ValidationError> {
    input
        .parse::<Ipv6Addr>()
        .map_err(|e| ValidationError::new(TargetKind::Ipv6, input, e))
}

/// Canonical textual form of an IPv6 address (the standard library's
/// preferred `::`-compressed representation).
pub fn normalize_ipv6(input: &str) -> Result<String, ValidationError> {
    Ok(validate_ipv6(input)?.to_string())
}

/// Validates an ASN, accepting either bare digits or an `AS`/`as`-prefixed form.
pub fn validate_asn(input: &str) -> Result<u32, ValidationError> {
    let digits = if input.len() >= 2 && input[..2].eq_ignore_ascii_case("as") {
        &input[2..]
    } else {
        input
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::new(
            TargetKind::Asn,
            input,
            "not an unsigned integer",
        ));
    }
    digits
        .parse::<u32>()
        .map_err(|e| ValidationError::new(TargetKind::Asn, input, e))
}

/// Canonical textual form of an ASN: `AS<digits>`.
pub fn normalize_asn(input: &str) -> Result<String, ValidationError> {
    Ok(format!("AS{}", validate_asn(input)?))
}

// --- IP classification predicates (spec §4.1) -----------------------------

/// RFC 1918 IPv4 private space, plus the IPv6 unique-local analogue (fc00::/7).
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            const RANGES: [(u8, u8, u8, u8, u8); 3] = [
                (10, 0, 0, 0, 8),
                (172, 16, 0, 0, 12),
                (192, 168, 0, 0, 16),
            ];
            RANGES
                .iter()
                .any(|&(a, b, c, d, bits)| in_v4_range(v4, a, b, c, d, bits))
        }
        IpAddr::V6(v6) => v6.segments()[0] & 0xfe00 == 0xfc00,
    }
}

/// 127.0.0.0/8 and ::1.
pub fn is_loopback_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.octets()[0] == 127,
        IpAddr::V6(v6) => v6.segments() == [0, 0, 0, 0, 0, 0, 0, 1],
    }
}

/// 169.254.0.0/16 and fe80::/10.
pub fn is_link_local_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => in_v4_range(v4, 169, 254, 0, 0, 16),
        IpAddr::V6(v6) => v6.segments()[0] & 0xffc0 == 0xfe80,
    }
}

/// 224.0.0.0/4 and ff00::/8.
pub fn is_multicast_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.octets()[0] & 0xf0 == 0xe0,
        IpAddr::V6(v6) => v6.segments()[0] & 0xff00 == 0xff00,
    }
}

/// 0.0.0.0/8 ("this network") and 240.0.0.0/4 (IPv4 reserved). IPv6 has no
/// counterpart in this category.
pub fn is_reserved_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.octets()[0] == 0 || v4.octets()[0] & 0xf0 == 0xf0,
        IpAddr::V6(_) => false,
    }
}

/// The union of every guarded category in spec §4.1: private, loopback,
/// link-local, multicast, and reserved/this-network.
pub fn is_unsafe_ip(ip: &IpAddr) -> bool {
    is_private_ip(ip) || is_loopback_ip(ip) || is_link_local_ip(ip) || is_multicast_ip(ip) || is_reserved_ip(ip)
}

fn in_v4_range(ip: &Ipv4Addr, a: u8, b: u8, c: u8, d: u8, prefix_bits: u8) -> bool {
    let net = u32::from_be_bytes([a, b, c, d]);
    let addr = u32::from(*ip);
    let mask = if prefix_bits == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_bits)
    };
    (addr & mask) == (net & mask)
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("EXAMPLE.com", "example.com")]
    #[case("example.com.", "example.com")]
    #[case("foo.example.com", "foo.example.com")]
    #[case(".com", ".com")] // root-relative label kept as-is aside from case/trailing dot
    fn GIVEN_domain_WHEN_validate_THEN_canonical_form(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(validate_domain(input).unwrap(), expected);
    }

    #[test]
    fn GIVEN_domain_WHEN_validate_twice_THEN_idempotent() {
        let once = normalize_domain("Example.COM.").unwrap();
        let twice = normalize_domain(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[rstest]
    #[case("-bad.com")]
    #[case("bad-.com")]
    #[case("")]
    #[case("has space.com")]
    #[case("under_score.com")]
    fn GIVEN_malformed_domain_WHEN_validate_THEN_error(#[case] input: &str) {
        assert!(validate_domain(input).is_err());
    }

    #[test]
    fn GIVEN_label_too_long_WHEN_validate_THEN_error() {
        let label = "a".repeat(64);
        let domain = format!("{label}.com");
        assert!(validate_domain(&domain).is_err());
    }

    #[test]
    fn GIVEN_ipv4_WHEN_validate_THEN_ok() {
        assert_eq!(validate_ipv4("192.0.2.1").unwrap(), Ipv4Addr::new(192, 0, 2, 1));
    }

    #[rstest]
    #[case("1.2.3.4.5")]
    #[case("1.2.3")]
    #[case("1. 2.3.4")]
    #[case("300.1.1.1")]
    fn GIVEN_malformed_ipv4_WHEN_validate_THEN_error(#[case] input: &str) {
        assert!(validate_ipv4(input).is_err());
    }

    #[test]
    fn GIVEN_ipv6_compressed_WHEN_validate_THEN_ok() {
        assert!(validate_ipv6("2001:db8::1").is_ok());
    }

    #[rstest]
    #[case("16509", 16509)]
    #[case("as16509", 16509)]
    #[case("AS16509", 16509)]
    #[case("As0", 0)]
    fn GIVEN_asn_forms_WHEN_validate_THEN_correct_value(#[case] input: &str, #[case] expected: u32) {
        assert_eq!(validate_asn(input).unwrap(), expected);
    }

    #[test]
    fn GIVEN_asn_WHEN_normalize_THEN_as_prefixed() {
        assert_eq!(normalize_asn("16509").unwrap(), "AS16509");
        assert_eq!(normalize_asn("as16509").unwrap(), "AS16509");
    }

    #[rstest]
    #[case("-5")]
    #[case("as")]
    #[case("4294967296")] // overflows u32
    fn GIVEN_malformed_asn_WHEN_validate_THEN_error(#[case] input: &str) {
        assert!(validate_asn(input).is_err());
    }

    #[rstest]
    #[case("10.1.2.3", true)]
    #[case("172.16.5.5", true)]
    #[case("192.168.1.1", true)]
    #[case("8.8.8.8", false)]
    fn GIVEN_ipv4_WHEN_is_private_ip_THEN_correct(#[case] ip: &str, #[case] expected: bool) {
        let addr: IpAddr = ip.parse().unwrap();
        assert_eq!(is_private_ip(&addr), expected);
    }

    #[test]
    fn GIVEN_ipv6_unique_local_WHEN_is_private_ip_THEN_true() {
        let addr: IpAddr = "fc00::1".parse().unwrap();
        assert!(is_private_ip(&addr));
    }

    #[rstest]
    #[case("127.0.0.1", true)]
    #[case("127.255.255.255", true)]
    #[case("8.8.8.8", false)]
    fn GIVEN_ipv4_WHEN_is_loopback_THEN_correct(#[case] ip: &str, #[case] expected: bool) {
        let addr: IpAddr = ip.parse().unwrap();
        assert_eq!(is_loopback_ip(&addr), expected);
    }

    #[test]
    fn GIVEN_ipv6_loopback_WHEN_is_loopback_THEN_true() {
        let addr: IpAddr = "::1".parse().unwrap();
        assert!(is_loopback_ip(&addr));
    }

    #[rstest]
    #[case("169.254.1.1", true)]
    #[case("8.8.8.8", false)]
    fn GIVEN_ipv4_WHEN_is_link_local_THEN_correct(#[case] ip: &str, #[case] expected: bool) {
        let addr: IpAddr = ip.parse().unwrap();
        assert_eq!(is_link_local_ip(&addr), expected);
    }

    #[test]
    fn GIVEN_ipv6_link_local_WHEN_is_link_local_THEN_true() {
        let addr: IpAddr = "fe80::1".parse().unwrap();
        assert!(is_link_local_ip(&addr));
    }

    #[rstest]
    #[case("224.0.0.1", true)]
    #[case("239.255.255.255", true)]
    #[case("8.8.8.8", false)]
    fn GIVEN_ipv4_WHEN_is_multicast_THEN_correct(#[case] ip: &str, #[case] expected: bool) {
        let addr: IpAddr = ip.parse().unwrap();
        assert_eq!(is_multicast_ip(&addr), expected);
    }

    #[rstest]
    #[case("0.0.0.1", true)]
    #[case("240.0.0.1", true)]
    #[case("8.8.8.8", false)]
    fn GIVEN_ipv4_WHEN_is_reserved_THEN_correct(#[case] ip: &str, #[case] expected: bool) {
        let addr: IpAddr = ip.parse().unwrap();
        assert_eq!(is_reserved_ip(&addr), expected);
    }

    #[test]
    fn GIVEN_public_ip_WHEN_is_unsafe_THEN_false() {
        let addr: IpAddr = "93.184.216.34".parse().unwrap();
        assert!(!is_unsafe_ip(&addr));
    }
}
