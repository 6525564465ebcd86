//! Metadata recorded alongside a fetched bootstrap registry snapshot.

use buildstructor::Builder;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Diagnostic metadata about the HTTP response that produced a bootstrap
/// registry snapshot, plus the wall-clock timestamp used for the snapshot's
/// 24h TTL (spec §3.3/§4.5.1).
#[derive(Serialize, Deserialize, Clone, Debug, Builder, PartialEq, Eq)]
pub struct HttpData {
    pub host: String,
    pub received: DateTime<Utc>,
    pub status_code: u16,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
}

#[buildstructor::buildstructor]
impl HttpData {
    #[builder(entry = "now")]
    pub fn new_now(
        host: String,
        status_code: Option<u16>,
        content_length: Option<u64>,
        content_type: Option<String>,
    ) -> Self {
        Self {
            host,
            received: Utc::now(),
            status_code: status_code.unwrap_or(200),
            content_length,
            content_type,
        }
    }

    #[builder(entry = "example")]
    pub fn new_example(status_code: Option<u16>) -> Self {
        Self {
            host: "example.com".to_string(),
            received: Utc::now(),
            status_code: status_code.unwrap_or(200),
            content_length: None,
            content_type: None,
        }
    }

    /// True once `max_age_secs` have elapsed since `received`.
    pub fn is_expired(&self, max_age_secs: i64) -> bool {
        Utc::now() >= self.received + Duration::seconds(max_age_secs)
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::HttpData;
    use chrono::{Duration, Utc};

    #[test]
    fn GIVEN_fresh_snapshot_WHEN_is_expired_THEN_false() {
        let data = HttpData::example().build();
        assert!(!data.is_expired(86_400));
    }

    #[test]
    fn GIVEN_snapshot_older_than_max_age_WHEN_is_expired_THEN_true() {
        let mut data = HttpData::example().build();
        data.received = Utc::now() - Duration::seconds(90_000);
        assert!(data.is_expired(86_400));
    }

    #[test]
    fn GIVEN_snapshot_at_exact_boundary_WHEN_is_expired_THEN_true() {
        let mut data = HttpData::example().build();
        data.received = Utc::now() - Duration::seconds(86_400);
        assert!(data.is_expired(86_400));
    }
}
