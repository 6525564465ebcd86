//! HTTP Fetcher (C3, spec §4.3): issues the HTTPS GET, walks redirects under
//! a single wall-clock budget, and classifies the outcome into [`RdapError`].
//!
//! Grounded on the teacher's `http/reqwest.rs` (`create_reqwest_client`,
//! `create_reqwest_client_with_addr`): a default pooled client is used when no
//! address pinning is required, and a small cache of addr-pinned clients
//! (themselves still pooling) is kept for the rebinding-mitigation path spec
//! §4.2 step 6 requires. One client per query would violate spec §5's
//! pooling requirement; one client per (host, pinned ip) pair does not.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::{Client as ReqwestClient, StatusCode};

use crate::error::{ErrorContext, RdapError};
use crate::ssrf::{validate_url, SsrfPolicy};

/// Response bodies larger than this are rejected as unparseable (spec §6.2).
pub const MAX_RESPONSE_BYTES: u64 = 10 * 1024 * 1024;

/// Per-call fetch options (spec §4.3).
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout_ms: u64,
    pub max_redirects: u8,
    pub user_agent: String,
    pub accept_header: String,
}

/// The decoded JSON body plus enough provenance for the orchestrator to
/// populate `source.query`/`source.discovered_via` (spec §3.4).
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub value: serde_json::Value,
    pub final_url: String,
    pub redirected: bool,
}

/// Issues SSRF-guarded HTTPS GETs, following redirects manually so each hop
/// is re-validated, and shares connection pools across queries.
pub struct Fetcher {
    default_client: ReqwestClient,
    pinned_clients: Mutex<HashMap<(String, IpAddr), ReqwestClient>>,
}

impl Fetcher {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self {
            default_client: build_client(None)?,
            pinned_clients: Mutex::new(HashMap::new()),
        })
    }

    /// Fetches `url`, following up to `options.max_redirects` redirects, each
    /// one SSRF-validated before being followed. Returns the decoded JSON
    /// body on a `200`, or an [`RdapError`] classified per spec §4.3's table.
    pub async fn fetch(
        &self,
        url: &str,
        options: &FetchOptions,
        policy: &SsrfPolicy,
    ) -> Result<FetchOutcome, RdapError> {
        let deadline = Instant::now() + Duration::from_millis(options.timeout_ms);
        let mut current = url.to_string();
        let mut redirected = false;

        for hop in 0..=options.max_redirects {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or_else(|| timeout_error(options.timeout_ms, &current))?;

            let clearance = validate_url(&current, policy, resolve_host)
                .await
                .map_err(|source| RdapError::Ssrf {
                    source,
                    context: ErrorContext::new().url(current.clone()),
                })?;

            let client = self.client_for(&current, clearance.pinned_ip)?;

            let request = client
                .get(&current)
                .header(reqwest::header::ACCEPT, &options.accept_header)
                .header(reqwest::header::USER_AGENT, &options.user_agent)
                .timeout(remaining);

            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    timeout_error(options.timeout_ms, &current)
                } else {
                    RdapError::Network {
                        message: e.to_string(),
                        context: ErrorContext::new().url(current.clone()),
                    }
                }
            })?;

            let status = response.status();

            if status.is_redirection() {
                if hop == options.max_redirects {
                    return Err(RdapError::Network {
                        message: format!("exceeded {} redirects", options.max_redirects),
                        context: ErrorContext::new().url(current.clone()),
                    });
                }
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| RdapError::Network {
                        message: "redirect response missing Location header".to_string(),
                        context: ErrorContext::new().url(current.clone()),
                    })?;
                current = resolve_redirect(&current, location)?;
                redirected = true;
                continue;
            }

            if status == StatusCode::OK {
                let final_url = current.clone();
                let value = read_json_body(response).await?;
                return Ok(FetchOutcome { value, final_url, redirected });
            }

            return Err(classify_status(status, response, &current).await);
        }

        unreachable!("loop always returns before exhausting max_redirects + 1 iterations")
    }

    fn client_for(&self, url: &str, pinned_ip: Option<IpAddr>) -> Result<ReqwestClient, RdapError> {
        let Some(ip) = pinned_ip else {
            return Ok(self.default_client.clone());
        };
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .ok_or_else(|| RdapError::Network {
                message: "could not parse host for client pinning".to_string(),
                context: ErrorContext::new().url(url.to_string()),
            })?;

        let key = (host.clone(), ip);
        let mut clients = self.pinned_clients.lock().expect("pinned client mutex poisoned");
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let client = build_client(Some((&host, SocketAddr::new(ip, 443))))
            .map_err(|e| RdapError::Network {
                message: e.to_string(),
                context: ErrorContext::new().url(url.to_string()),
            })?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

/// Resolves a hostname via the Tokio runtime's DNS, the `resolve` closure
/// the SSRF guard's `validate_url` is parameterized over.
async fn resolve_host(host: String) -> std::io::Result<Vec<IpAddr>> {
    let addrs = tokio::net::lookup_host((host.as_str(), 443)).await?;
    Ok(addrs.map(|s| s.ip()).collect())
}

/// Scheme enforcement lives in the SSRF guard (`policy.scheme`, checked on
/// every hop before a request is issued), not here, so the same client can
/// serve both the production `https`-only policy and a `http`-scheme policy
/// used for local testing against a mock server.
fn build_client(pin: Option<(&str, SocketAddr)>) -> Result<ReqwestClient, reqwest::Error> {
    let mut builder = ReqwestClient::builder().redirect(reqwest::redirect::Policy::none());
    if let Some((domain, addr)) = pin {
        builder = builder.resolve(domain, addr);
    }
    builder.build()
}

fn resolve_redirect(base: &str, location: &str) -> Result<String, RdapError> {
    let base_url = url::Url::parse(base).map_err(|_| RdapError::Network {
        message: "invalid base url while following redirect".to_string(),
        context: ErrorContext::new().url(base.to_string()),
    })?;
    base_url
        .join(location)
        .map(|u| u.to_string())
        .map_err(|_| RdapError::Network {
            message: format!("invalid redirect location: {location}"),
            context: ErrorContext::new().url(base.to_string()),
        })
}

fn timeout_error(budget_ms: u64, url: &str) -> RdapError {
    RdapError::Timeout {
        budget_ms,
        context: ErrorContext::new().url(url.to_string()),
    }
}

async fn read_json_body(response: reqwest::Response) -> Result<serde_json::Value, RdapError> {
    let url = response.url().to_string();
    let mut stream = response.bytes_stream();
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| RdapError::Network {
            message: e.to_string(),
            context: ErrorContext::new().url(url.clone()),
        })?;
        if body.len() as u64 + chunk.len() as u64 > MAX_RESPONSE_BYTES {
            return Err(RdapError::Parse {
                field: "body".to_string(),
                context: ErrorContext::new()
                    .url(url.clone())
                    .cause("response exceeded the 10 MiB size cap"),
            });
        }
        body.extend_from_slice(&chunk);
    }
    serde_json::from_slice(&body).map_err(|e| RdapError::Parse {
        field: "body".to_string(),
        context: ErrorContext::new().url(url).cause(e.to_string()),
    })
}

/// Spec §4.3's non-redirect status table, plus `Retry-After` parsing for 429s.
async fn classify_status(status: StatusCode, response: reqwest::Response, url: &str) -> RdapError {
    let retry_after = parse_retry_after(&response);
    let context = ErrorContext::new().url(url.to_string());
    let body_excerpt: String = response
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(512)
        .collect();

    if status == StatusCode::TOO_MANY_REQUESTS {
        return RdapError::RateLimit {
            retry_after_s: retry_after.unwrap_or(0),
            context,
        };
    }
    RdapError::RdapServer {
        status: status.as_u16(),
        body_excerpt,
        retryable: status.is_server_error(),
        context,
    }
}

/// Accepts seconds (non-negative integer) or an HTTP-date; malformed values
/// yield `None` so the caller falls back to `retry_after_s = 0` (spec §4.3).
fn parse_retry_after(response: &reqwest::Response) -> Option<u64> {
    let raw = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?;
    if let Ok(secs) = raw.trim().parse::<u64>() {
        return Some(secs);
    }
    let date = chrono::DateTime::parse_from_rfc2822(raw.trim()).ok()?;
    let now = chrono::Utc::now();
    let delta = date.with_timezone(&chrono::Utc) - now;
    Some(delta.num_seconds().max(0) as u64)
}
