//! HTTP client for Strava segment streams with polite rate limiting.
//!
//! The stream endpoint is public and unauthenticated, so requests are made
//! one at a time with a fixed pause between network fetches. There is no
//! retry: a failed segment is reported to the caller, which skips the route.

use crate::config::BuildConfig;
use crate::error::{BuildError, Result};
use crate::SegmentId;
use log::{debug, info};
use reqwest::header::ACCEPT;
use reqwest::Client;
use std::future::Future;
use std::time::Duration;

/// Segment stream endpoint; `{segmentId}` is replaced per request.
pub const STRAVA_STREAM_URL: &str =
    "https://www.strava.com/stream/segments/{segmentId}?streams%5B%5D=latlng&streams%5B%5D=distance";

pub const DEFAULT_USER_AGENT: &str = "ZwiftGeoJSONBuilder/1.0";

/// Pause between consecutive network fetches
pub const POLITE_DELAY_MS: u64 = 250;

pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Status and raw body of a stream request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamResponse {
    pub status: u16,
    pub body: String,
}

impl StreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Where segment stream payloads come from.
pub trait StreamSource {
    /// Request the stream for one segment. `Err` means no response was
    /// received at all (connection, TLS, timeout).
    fn fetch_segment(&self, segment_id: &SegmentId) -> impl Future<Output = Result<StreamResponse>>;
}

/// Fixed-delay rate limiter keyed on how many fetches already happened.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    delay: Duration,
}

impl RateLimiter {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Sleep before a fetch unless it is the first one of the run.
    pub async fn wait_if_needed(&self, prior_fetches: u32) {
        if prior_fetches == 0 || self.delay.is_zero() {
            return;
        }
        debug!("Rate limit: waiting {:?}", self.delay);
        tokio::time::sleep(self.delay).await;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(POLITE_DELAY_MS))
    }
}

/// Fetches segment streams from strava.com.
pub struct StravaStreamClient {
    client: Client,
    url_template: String,
}

impl StravaStreamClient {
    /// Create a client using the endpoint, user agent and timeout from `config`.
    pub fn new(config: &BuildConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BuildError::Http {
                message: format!("Failed to create HTTP client: {}", e),
                status_code: None,
            })?;

        Ok(Self {
            client,
            url_template: config.stream_url_template.clone(),
        })
    }

    pub fn segment_url(&self, segment_id: &SegmentId) -> String {
        self.url_template
            .replace("{segmentId}", segment_id.as_str())
    }
}

impl StreamSource for StravaStreamClient {
    async fn fetch_segment(&self, segment_id: &SegmentId) -> Result<StreamResponse> {
        let url = self.segment_url(segment_id);
        info!("[FETCH] {}", url);

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| BuildError::Http {
                message: format!("Request error: {}", e),
                status_code: e.status().map(|s| s.as_u16()),
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| BuildError::Http {
            message: format!("Failed to read response body: {}", e),
            status_code: Some(status),
        })?;

        Ok(StreamResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_rate_limiter_first_fetch_is_immediate() {
        let limiter = RateLimiter::default();

        let start = Instant::now();
        limiter.wait_if_needed(0).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_rate_limiter_waits_after_first_fetch() {
        let limiter = RateLimiter::new(Duration::from_millis(40));

        let start = Instant::now();
        limiter.wait_if_needed(1).await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_segment_url() {
        let client = StravaStreamClient::new(&BuildConfig::default()).unwrap();
        assert_eq!(
            client.segment_url(&SegmentId::new("12744502")),
            "https://www.strava.com/stream/segments/12744502?streams%5B%5D=latlng&streams%5B%5D=distance"
        );
    }

    #[test]
    fn test_response_success_range() {
        let ok = StreamResponse {
            status: 200,
            body: "{}".to_string(),
        };
        let limited = StreamResponse {
            status: 429,
            body: String::new(),
        };
        assert!(ok.is_success());
        assert!(!limited.is_success());
    }
}
