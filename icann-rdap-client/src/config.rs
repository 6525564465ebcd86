//! The flat configuration record (spec §6.4). A single record with
//! defaults; per-call behavior is overridden via [`crate::orchestrator::QueryOptions`],
//! not by mutating this record mid-query.

use crate::ssrf::SsrfPolicy;

/// Backoff strategy used between retry attempts (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    Exponential,
    Linear,
    Fixed,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_s: u64,
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_s: 3600,
            max_size: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub strategy: RetryStrategy,
    pub initial_ms: u64,
    pub max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: RetryStrategy::Exponential,
            initial_ms: 1000,
            max_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub request_ms: u64,
    pub bootstrap_ms: Option<u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: 10_000,
            bootstrap_ms: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrivacyConfig {
    pub redact_pii: bool,
    pub redact_fields: Vec<String>,
    pub replacement: String,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            redact_pii: true,
            redact_fields: vec![
                "email".to_string(),
                "tel".to_string(),
                "phone".to_string(),
                "fax".to_string(),
                "adr".to_string(),
            ],
            replacement: "[REDACTED]".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    pub max_redirects: u8,
    pub accept_header: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("icann-rdap-client/{}", icann_rdap_common::VERSION),
            max_redirects: 5,
            accept_header: format!(
                "{}, {}",
                icann_rdap_common::media_types::RDAP_MEDIA_TYPE,
                icann_rdap_common::media_types::JSON_MEDIA_TYPE
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub base_url: String,
    pub refresh_s: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            base_url: "https://data.iana.org/rdap".to_string(),
            refresh_s: 86_400,
        }
    }
}

/// The top-level, flat configuration record (spec §6.4).
#[derive(Debug, Clone)]
pub struct Config {
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub timeout: TimeoutConfig,
    pub ssrf: SsrfPolicy,
    pub privacy: PrivacyConfig,
    pub http: HttpConfig,
    pub bootstrap: BootstrapConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            timeout: TimeoutConfig::default(),
            ssrf: SsrfPolicy::default(),
            privacy: PrivacyConfig::default(),
            http: HttpConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;

    #[test]
    fn GIVEN_default_config_WHEN_constructed_THEN_matches_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_ms, 1000);
        assert_eq!(config.retry.max_ms, 10_000);
        assert_eq!(config.cache.ttl_s, 3600);
        assert_eq!(config.cache.max_size, 1000);
        assert_eq!(config.http.max_redirects, 5);
        assert_eq!(config.bootstrap.base_url, "https://data.iana.org/rdap");
        assert_eq!(config.bootstrap.refresh_s, 86_400);
        assert!(config.ssrf.enabled);
        assert!(config.privacy.redact_pii);
    }
}
