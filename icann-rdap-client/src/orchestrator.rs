//! Query Orchestrator (C6, spec §4.7): the state machine tying validation,
//! cache, bootstrap discovery, fetch, retry, normalization, and redaction
//! together. Grounded on the teacher's `rdap/request.rs` composition style
//! (`rdap_bootstrapped_request` chaining `qtype_to_bootstrap_url` then
//! `rdap_request`), generalized with the retry/backoff loop and the
//! cache/coalescing layer spec §4.5/§4.7/§9 add on top.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use icann_rdap_common::target::Target;

use crate::bootstrap::{query_url, BootstrapResolver};
use crate::cache::{CachePort, InMemoryCache};
use crate::config::{Config, RetryStrategy};
use crate::error::RdapError;
use crate::fetcher::{FetchOptions, Fetcher};
use crate::redact::redact;
use crate::response::{normalize, DiscoveredVia, QueryContext, ResponseSource};
use crate::response::CanonicalResponse;

/// Per-call overrides to the configured defaults (spec §6.1).
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub include_raw: bool,
    pub skip_cache: bool,
    pub force_refresh: bool,
    pub cache_ttl_override_s: Option<u64>,
    pub redact_pii: Option<bool>,
}

type InFlight = Arc<OnceCell<Result<CanonicalResponse, RdapError>>>;

/// The RDAP client: owns the shared HTTP client, bootstrap resolver, and
/// response cache for the lifetime of the process (spec §5: "the HTTP
/// client ... is shared across queries").
pub struct RdapClient {
    config: Config,
    cache: Arc<dyn CachePort>,
    bootstrap: BootstrapResolver,
    fetcher: Fetcher,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

impl RdapClient {
    pub fn new(config: Config) -> Result<Self, reqwest::Error> {
        let cache: Arc<dyn CachePort> = Arc::new(InMemoryCache::new(config.cache.max_size));
        let bootstrap = BootstrapResolver::new(config.bootstrap.clone());
        let fetcher = Fetcher::new()?;
        Ok(Self {
            config,
            cache,
            bootstrap,
            fetcher,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Swaps in a different cache backend, e.g. a persistent implementation
    /// satisfying [`CachePort`] (spec §6.3 permits any conformant backend).
    pub fn with_cache(mut self, cache: Arc<dyn CachePort>) -> Self {
        self.cache = cache;
        self
    }

    /// Runs the full state machine in spec §4.7 for a single `target`.
    pub async fn query(
        &self,
        target: Target,
        options: QueryOptions,
    ) -> Result<CanonicalResponse, RdapError> {
        let key = target.cache_key();
        let redact_pii = options.redact_pii.unwrap_or(self.config.privacy.redact_pii);

        if !options.skip_cache && !options.force_refresh {
            if let Some(cached) = self.cache.get(&key) {
                debug!(%key, "response cache hit");
                let mut hit = cached;
                hit.served_from_cache = true;
                return Ok(self.maybe_redact(&hit, redact_pii));
            }
        }

        let unredacted = self.resolve_and_fetch(&target, &key, &options).await?;

        // `skip_cache` only bypasses the read-check above; a successful
        // fetch is still written back so a later, non-skip_cache query
        // observes it (spec §6.1: "bypass response cache read; still write
        // on success").
        let ttl = options.cache_ttl_override_s.unwrap_or(self.config.cache.ttl_s);
        if self.config.cache.enabled {
            self.cache.set(&key, unredacted.clone(), ttl);
        }

        Ok(self.maybe_redact(&unredacted, redact_pii))
    }

    fn maybe_redact(&self, response: &CanonicalResponse, redact_pii: bool) -> CanonicalResponse {
        if redact_pii {
            redact(response, &self.config.privacy)
        } else {
            response.clone()
        }
    }

    /// At-most-once concurrent fetch per key (spec §4.7/§9): a miss
    /// publishes a shared, not-yet-resolved future under `key`; concurrent
    /// misses on the same key await that same future instead of triggering
    /// a second fetch. The insertion of the future and the decision to fetch
    /// happen under the same lock so two concurrent misses cannot race past
    /// each other.
    async fn resolve_and_fetch(
        &self,
        target: &Target,
        key: &str,
        options: &QueryOptions,
    ) -> Result<CanonicalResponse, RdapError> {
        let cell = {
            let mut in_flight = self.in_flight.lock().expect("in-flight mutex poisoned");
            in_flight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell
            .get_or_init(|| self.resolve_and_fetch_uncoalesced(target, options))
            .await
            .clone();

        // Remove the slot once settled so a future cache-expiry miss on the
        // same key triggers a fresh fetch rather than replaying this result.
        self.in_flight.lock().expect("in-flight mutex poisoned").remove(key);

        result
    }

    async fn resolve_and_fetch_uncoalesced(
        &self,
        target: &Target,
        options: &QueryOptions,
    ) -> Result<CanonicalResponse, RdapError> {
        let base_url = self
            .bootstrap
            .resolve(
                target,
                &self.fetcher,
                &self.config.ssrf,
                self.config.timeout.bootstrap_ms.unwrap_or(self.config.timeout.request_ms),
            )
            .await?;
        let query = query_url(&base_url, target);

        let fetch_options = FetchOptions {
            timeout_ms: self.config.timeout.request_ms,
            max_redirects: self.config.http.max_redirects as u8,
            user_agent: self.config.http.user_agent.clone(),
            accept_header: self.config.http.accept_header.clone(),
        };

        let mut attempt = 1;

        loop {
            match self.fetcher.fetch(&query, &fetch_options, &self.config.ssrf).await {
                Ok(outcome) => {
                    let discovered_via = if outcome.redirected {
                        DiscoveredVia::Redirect
                    } else {
                        DiscoveredVia::Bootstrap
                    };
                    let ctx = QueryContext {
                        source: ResponseSource {
                            base_url: base_url.clone(),
                            query: outcome.final_url,
                            discovered_via,
                        },
                        include_raw: options.include_raw,
                    };
                    return normalize(&outcome.value, &ctx);
                }
                Err(err) if err.is_retryable() && attempt < self.config.retry.max_attempts => {
                    let delay = calculate_backoff(
                        attempt,
                        self.config.retry.strategy,
                        self.config.retry.initial_ms,
                        self.config.retry.max_ms,
                        err.retry_after_s(),
                    );
                    warn!(attempt, delay_ms = delay, "rdap fetch failed, retrying after backoff");
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// `calculate_backoff` per spec §4.7: strategy-driven delay, floored by
/// `retry_after_s * 1000` when the failing error carried a `Retry-After`.
fn calculate_backoff(
    attempt: u32,
    strategy: RetryStrategy,
    initial_ms: u64,
    max_ms: u64,
    retry_after_s: Option<u64>,
) -> u64 {
    let calculated = match strategy {
        RetryStrategy::Exponential => initial_ms.saturating_mul(1u64 << (attempt - 1)).min(max_ms),
        RetryStrategy::Linear => initial_ms.saturating_mul(attempt as u64).min(max_ms),
        RetryStrategy::Fixed => initial_ms,
    };
    match retry_after_s {
        Some(s) => calculated.max(s * 1000),
        None => calculated,
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;

    #[test]
    fn GIVEN_exponential_strategy_WHEN_calculate_backoff_THEN_doubles_and_caps() {
        assert_eq!(calculate_backoff(1, RetryStrategy::Exponential, 1000, 10_000, None), 1000);
        assert_eq!(calculate_backoff(2, RetryStrategy::Exponential, 1000, 10_000, None), 2000);
        assert_eq!(calculate_backoff(5, RetryStrategy::Exponential, 1000, 10_000, None), 10_000);
    }

    #[test]
    fn GIVEN_linear_strategy_WHEN_calculate_backoff_THEN_scales_with_attempt() {
        assert_eq!(calculate_backoff(3, RetryStrategy::Linear, 1000, 10_000, None), 3000);
    }

    #[test]
    fn GIVEN_fixed_strategy_WHEN_calculate_backoff_THEN_constant() {
        assert_eq!(calculate_backoff(1, RetryStrategy::Fixed, 1000, 10_000, None), 1000);
        assert_eq!(calculate_backoff(4, RetryStrategy::Fixed, 1000, 10_000, None), 1000);
    }

    #[test]
    fn GIVEN_retry_after_exceeds_calculated_WHEN_calculate_backoff_THEN_retry_after_wins() {
        let delay = calculate_backoff(1, RetryStrategy::Exponential, 1000, 10_000, Some(2));
        assert_eq!(delay, 2000);
    }

    #[test]
    fn GIVEN_retry_after_below_calculated_WHEN_calculate_backoff_THEN_calculated_wins() {
        let delay = calculate_backoff(3, RetryStrategy::Exponential, 1000, 10_000, Some(1));
        assert_eq!(delay, 4000);
    }

    use crate::response::{ObjectClass, TypeSpecific};
    use crate::ssrf::SsrfPolicy;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn permissive_policy() -> SsrfPolicy {
        SsrfPolicy {
            allow_list: vec!["127.0.0.1".to_string(), "localhost".to_string()],
            scheme: "http".to_string(),
            ..SsrfPolicy::default()
        }
    }

    fn test_config(bootstrap_base_url: String) -> Config {
        Config {
            ssrf: permissive_policy(),
            bootstrap: crate::config::BootstrapConfig {
                base_url: bootstrap_base_url,
                refresh_s: 86_400,
            },
            ..Config::default()
        }
    }

    async fn mount_domain(server: &MockServer, tld: &str, handle: &str) {
        Mock::given(method("GET"))
            .and(path("/dns.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "version": "1.0",
                "publication": "2024-01-01T00:00:00Z",
                "description": null,
                "services": [[[tld], [server.uri()]]]
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/domain/example.{tld}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "objectClassName": "domain",
                "handle": handle,
                "nameservers": []
            })))
            .mount(server)
            .await;
    }

    fn stale_response(key_handle: &str) -> CanonicalResponse {
        CanonicalResponse {
            object_class: ObjectClass::Domain,
            handle: Some(key_handle.to_string()),
            status: vec![],
            events: vec![],
            entities: vec![],
            type_specific: TypeSpecific::Domain {
                nameservers: vec![],
                secure_dns: None,
            },
            source: ResponseSource {
                base_url: "https://stale.example".to_string(),
                query: "https://stale.example/domain/example.stale".to_string(),
                discovered_via: DiscoveredVia::Bootstrap,
            },
            served_from_cache: false,
            raw: None,
        }
    }

    #[tokio::test]
    async fn GIVEN_skip_cache_WHEN_query_succeeds_THEN_result_is_still_written_to_cache() {
        let server = MockServer::start().await;
        mount_domain(&server, "skipcache", "EX-FRESH").await;

        let cache = Arc::new(InMemoryCache::new(10));
        let client = RdapClient::new(test_config(server.uri()))
            .unwrap()
            .with_cache(cache.clone());
        let target = Target::domain("example.skipcache").unwrap();
        let key = target.cache_key();

        let options = QueryOptions {
            skip_cache: true,
            ..QueryOptions::default()
        };
        let result = client.query(target, options).await.unwrap();
        assert_eq!(result.handle.as_deref(), Some("EX-FRESH"));

        let cached = cache.get(&key).expect("skip_cache must still write on success");
        assert_eq!(cached.handle.as_deref(), Some("EX-FRESH"));
    }

    #[tokio::test]
    async fn GIVEN_force_refresh_WHEN_query_THEN_bypasses_stale_entry_and_overwrites_it() {
        let server = MockServer::start().await;
        mount_domain(&server, "forcerefresh", "EX-FRESH").await;

        let cache = Arc::new(InMemoryCache::new(10));
        let target = Target::domain("example.forcerefresh").unwrap();
        let key = target.cache_key();
        cache.set(&key, stale_response("EX-STALE"), 3600);

        let client = RdapClient::new(test_config(server.uri()))
            .unwrap()
            .with_cache(cache.clone());

        let options = QueryOptions {
            force_refresh: true,
            ..QueryOptions::default()
        };
        let result = client.query(target, options).await.unwrap();
        assert_eq!(result.handle.as_deref(), Some("EX-FRESH"));

        let cached = cache.get(&key).unwrap();
        assert_eq!(cached.handle.as_deref(), Some("EX-FRESH"));
    }
}
