//! Bootstrap Resolver, networking half (C4, spec §4.4/§4.5.1).
//!
//! The matching rules themselves (CIDR/ASN-range containment, TLD lookup,
//! fail-closed on malformed patterns) live in `icann_rdap_common::iana` — this
//! module is only the fetch-and-cache machinery around it, grounded on the
//! teacher's `iana/bootstrap.rs::MemoryBootstrapStore`. Where the teacher
//! keeps one `RwLock<Option<(IanaRegistry, HttpData)>>` per registry type, we
//! add a `fetch_lock` beside it so concurrent misses on the same type
//! coalesce into a single fetch (spec §4.4: "Concurrent misses on the same
//! type MUST coalesce").

use std::sync::Arc;

use icann_rdap_common::httpdata::HttpData;
use icann_rdap_common::iana::{BootstrapRegistry, IanaRegistryType, RdapBootstrapRegistry};
use icann_rdap_common::target::{QueryType, Target};
use pct_str::{PctString, URIReserved};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::config::BootstrapConfig;
use crate::error::{ErrorContext, RdapError};
use crate::fetcher::{FetchOptions, Fetcher};
use crate::ssrf::SsrfPolicy;

type Snapshot = Option<(Arc<RdapBootstrapRegistry>, HttpData)>;

struct RegistrySlot {
    snapshot: RwLock<Snapshot>,
    fetch_lock: Mutex<()>,
}

impl Default for RegistrySlot {
    fn default() -> Self {
        Self {
            snapshot: RwLock::new(None),
            fetch_lock: Mutex::new(()),
        }
    }
}

/// Resolves a [`Target`] to an authoritative RDAP base URL, caching the four
/// IANA bootstrap registries with a 24h TTL and stale-on-error fallback.
pub struct BootstrapResolver {
    dns: RegistrySlot,
    ipv4: RegistrySlot,
    ipv6: RegistrySlot,
    asn: RegistrySlot,
    config: BootstrapConfig,
}

const BOOTSTRAP_TTL_SECS: i64 = 86_400;

impl BootstrapResolver {
    pub fn new(config: BootstrapConfig) -> Self {
        Self {
            dns: RegistrySlot::default(),
            ipv4: RegistrySlot::default(),
            ipv6: RegistrySlot::default(),
            asn: RegistrySlot::default(),
            config,
        }
    }

    /// Resolves `target` to its authoritative RDAP query URL, fetching and
    /// caching the relevant bootstrap registry as needed.
    pub async fn resolve(
        &self,
        target: &Target,
        fetcher: &Fetcher,
        ssrf_policy: &SsrfPolicy,
        timeout_ms: u64,
    ) -> Result<String, RdapError> {
        let reg_type = match target.query_type() {
            QueryType::Domain => IanaRegistryType::RdapBootstrapDns,
            QueryType::Ipv4 => IanaRegistryType::RdapBootstrapIpv4,
            QueryType::Ipv6 => IanaRegistryType::RdapBootstrapIpv6,
            QueryType::Asn => IanaRegistryType::RdapBootstrapAsn,
        };
        let slot = self.slot(reg_type);
        let registry = self
            .ensure_fresh(slot, reg_type, fetcher, ssrf_policy, timeout_ms)
            .await?;

        let urls = match target {
            Target::Domain(d) => registry.get_dns_bootstrap_urls(d),
            Target::Ipv4(ip) => registry.get_ipv4_bootstrap_urls(ip),
            Target::Ipv6(ip) => registry.get_ipv6_bootstrap_urls(ip),
            Target::Asn(n) => registry.get_asn_bootstrap_urls(&n.to_string()),
        }
        .map_err(|source| RdapError::from(source))
        .map_err(|e| with_target(e, target))?;

        let base = icann_rdap_common::iana::get_preferred_url(urls)
            .map_err(RdapError::from)
            .map_err(|e| with_target(e, target))?;

        Ok(query_url(&base, target))
    }

    fn slot(&self, reg_type: IanaRegistryType) -> &RegistrySlot {
        match reg_type {
            IanaRegistryType::RdapBootstrapDns => &self.dns,
            IanaRegistryType::RdapBootstrapIpv4 => &self.ipv4,
            IanaRegistryType::RdapBootstrapIpv6 => &self.ipv6,
            IanaRegistryType::RdapBootstrapAsn => &self.asn,
        }
    }

    /// Double-checked-locking refresh: returns the current snapshot if it is
    /// still within its 24h TTL, otherwise fetches a replacement. On fetch
    /// failure, a still-present (but expired) snapshot is served stale
    /// (spec §4.5.1) rather than failing the query.
    async fn ensure_fresh(
        &self,
        slot: &RegistrySlot,
        reg_type: IanaRegistryType,
        fetcher: &Fetcher,
        ssrf_policy: &SsrfPolicy,
        timeout_ms: u64,
    ) -> Result<Arc<RdapBootstrapRegistry>, RdapError> {
        if let Some((registry, data)) = slot.snapshot.read().await.as_ref() {
            if !data.is_expired(BOOTSTRAP_TTL_SECS) {
                return Ok(registry.clone());
            }
        }

        let _fetch_guard = slot.fetch_lock.lock().await;
        // Re-check: another task may have refreshed the snapshot while we
        // waited for the fetch lock.
        if let Some((registry, data)) = slot.snapshot.read().await.as_ref() {
            if !data.is_expired(BOOTSTRAP_TTL_SECS) {
                return Ok(registry.clone());
            }
        }

        debug!(?reg_type, "fetching iana bootstrap registry");
        let url = format!(
            "{}/{}.json",
            self.config.base_url.trim_end_matches('/'),
            registry_file_stem(reg_type)
        );
        let options = FetchOptions {
            timeout_ms,
            max_redirects: 5,
            user_agent: format!("icann-rdap-client/{}", icann_rdap_common::VERSION),
            accept_header: icann_rdap_common::media_types::JSON_MEDIA_TYPE.to_string(),
        };

        match fetcher.fetch(&url, &options, ssrf_policy).await {
            Ok(outcome) => {
                let parsed: RdapBootstrapRegistry =
                    serde_json::from_value(outcome.value).map_err(|e| RdapError::Parse {
                        field: "bootstrap registry".to_string(),
                        context: ErrorContext::new().url(url.clone()).cause(e.to_string()),
                    })?;
                let parsed = Arc::new(parsed);
                let data = HttpData::now().host(host_of(&url)).status_code(200u16).build();
                *slot.snapshot.write().await = Some((parsed.clone(), data));
                Ok(parsed)
            }
            Err(e) => {
                if let Some((registry, _)) = slot.snapshot.read().await.as_ref() {
                    debug!(?reg_type, "bootstrap fetch failed, serving stale snapshot");
                    return Ok(registry.clone());
                }
                Err(e)
            }
        }
    }
}

fn with_target(err: RdapError, target: &Target) -> RdapError {
    match err {
        RdapError::NoServerFound { context } => RdapError::NoServerFound {
            context: ErrorContext {
                target: Some(target.to_string()),
                ..context
            },
        },
        other => other,
    }
}

fn registry_file_stem(reg_type: IanaRegistryType) -> &'static str {
    match reg_type {
        IanaRegistryType::RdapBootstrapDns => "dns",
        IanaRegistryType::RdapBootstrapIpv4 => "ipv4",
        IanaRegistryType::RdapBootstrapIpv6 => "ipv6",
        IanaRegistryType::RdapBootstrapAsn => "asn",
    }
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

/// Builds the final query URL from a base URL and a [`Target`] (spec §4.4).
pub fn query_url(base_url: &str, target: &Target) -> String {
    let base = base_url.trim_end_matches('/');
    match target {
        Target::Domain(d) => format!(
            "{base}/domain/{}",
            PctString::encode(d.chars(), URIReserved)
        ),
        Target::Ipv4(ip) => format!("{base}/ip/{}", PctString::encode(ip.chars(), URIReserved)),
        Target::Ipv6(ip) => format!("{base}/ip/{}", PctString::encode(ip.chars(), URIReserved)),
        Target::Asn(n) => format!("{base}/autnum/{n}"),
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;

    #[test]
    fn GIVEN_domain_target_WHEN_query_url_THEN_domain_path() {
        let target = Target::domain("example.com").unwrap();
        assert_eq!(
            query_url("https://rdap.example.net/", &target),
            "https://rdap.example.net/domain/example.com"
        );
    }

    #[test]
    fn GIVEN_ipv4_target_WHEN_query_url_THEN_ip_path() {
        let target = Target::ipv4("192.0.2.1").unwrap();
        assert_eq!(
            query_url("https://rdap.example.net", &target),
            "https://rdap.example.net/ip/192.0.2.1"
        );
    }

    #[test]
    fn GIVEN_asn_target_WHEN_query_url_THEN_autnum_path() {
        let target = Target::asn("AS64512").unwrap();
        assert_eq!(
            query_url("https://rdap.example.net/", &target),
            "https://rdap.example.net/autnum/64512"
        );
    }

    #[tokio::test]
    async fn GIVEN_fresh_snapshot_WHEN_resolve_twice_THEN_one_fetch() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dns.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "version": "1.0",
                "publication": "2024-01-01T00:00:00Z",
                "description": null,
                "services": [[["com"], ["https://rdap.verisign-grs.com/"]]]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = BootstrapResolver::new(BootstrapConfig {
            base_url: server.uri(),
            refresh_s: 86_400,
        });
        let fetcher = Fetcher::new().unwrap();
        let policy = SsrfPolicy {
            allow_list: vec!["127.0.0.1".to_string()],
            scheme: "http".to_string(),
            ..SsrfPolicy::default()
        };
        let target = Target::domain("example.com").unwrap();

        let first = resolver.resolve(&target, &fetcher, &policy, 5_000).await.unwrap();
        let second = resolver.resolve(&target, &fetcher, &policy, 5_000).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "https://rdap.verisign-grs.com/domain/example.com");
    }
}
