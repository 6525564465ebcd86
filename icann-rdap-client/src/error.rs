//! Error taxonomy for the RDAP client core (spec §7).
//!
//! Every variant carries an [`ErrorContext`] in addition to whatever
//! structured detail its own kind needs, and reports whether the
//! orchestrator should treat it as retryable.

use std::fmt;

use icann_rdap_common::iana::BootstrapRegistryError;
use icann_rdap_common::validators::ValidationError;
use thiserror::Error;

use crate::ssrf::SsrfError;

/// Target, URL, attempt number, and upstream cause for a single error
/// occurrence. Fields are populated as far upstream as the information is
/// known; none are required.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub target: Option<String>,
    pub url: Option<String>,
    pub attempt: Option<u32>,
    pub cause: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(t) = &self.target {
            parts.push(format!("target={t}"));
        }
        if let Some(u) = &self.url {
            parts.push(format!("url={u}"));
        }
        if let Some(a) = &self.attempt {
            parts.push(format!("attempt={a}"));
        }
        if let Some(c) = &self.cause {
            parts.push(format!("cause={c}"));
        }
        write!(f, "{}", parts.join(" "))
    }
}

/// The full RDAP client error taxonomy (spec §7). Each kind maps to exactly
/// one of the transitions in the query orchestrator's state machine.
#[derive(Debug, Clone, Error)]
pub enum RdapError {
    #[error("validation error: {source} ({context})")]
    Validation {
        #[source]
        source: ValidationError,
        context: ErrorContext,
    },

    #[error("ssrf protection: {source} ({context})")]
    Ssrf {
        #[source]
        source: SsrfError,
        context: ErrorContext,
    },

    #[error("no rdap server found for target ({context})")]
    NoServerFound { context: ErrorContext },

    #[error("network error: {message} ({context})")]
    Network { message: String, context: ErrorContext },

    #[error("request timed out after {budget_ms}ms ({context})")]
    Timeout { budget_ms: u64, context: ErrorContext },

    #[error("rdap server returned {status} ({context})")]
    RdapServer {
        status: u16,
        body_excerpt: String,
        retryable: bool,
        context: ErrorContext,
    },

    #[error("rate limited, retry after {retry_after_s}s ({context})")]
    RateLimit {
        retry_after_s: u64,
        context: ErrorContext,
    },

    #[error("could not parse response: {field} ({context})")]
    Parse { field: String, context: ErrorContext },
}

impl RdapError {
    /// Whether the orchestrator may retry this error per spec §4.7/§7.
    pub fn is_retryable(&self) -> bool {
        match self {
            RdapError::Network { .. } | RdapError::Timeout { .. } | RdapError::RateLimit { .. } => {
                true
            }
            RdapError::RdapServer { retryable, .. } => *retryable,
            RdapError::Validation { .. }
            | RdapError::Ssrf { .. }
            | RdapError::NoServerFound { .. }
            | RdapError::Parse { .. } => false,
        }
    }

    /// Seconds the orchestrator's backoff calculation must honor as a floor,
    /// for `RateLimitError`'s `Retry-After` contract.
    pub fn retry_after_s(&self) -> Option<u64> {
        match self {
            RdapError::RateLimit { retry_after_s, .. } => Some(*retry_after_s),
            _ => None,
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            RdapError::Validation { context, .. }
            | RdapError::Ssrf { context, .. }
            | RdapError::NoServerFound { context }
            | RdapError::Network { context, .. }
            | RdapError::Timeout { context, .. }
            | RdapError::RdapServer { context, .. }
            | RdapError::RateLimit { context, .. }
            | RdapError::Parse { context, .. } => context,
        }
    }
}

impl From<BootstrapRegistryError> for RdapError {
    fn from(source: BootstrapRegistryError) -> Self {
        RdapError::NoServerFound {
            context: ErrorContext::new().cause(source.to_string()),
        }
    }
}
