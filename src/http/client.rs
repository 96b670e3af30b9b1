//! Resilient fetch primitive
//!
//! `HttpClient::get` composes the cache, the shared rate limiter and the retry
//! policy over one pooled `reqwest::Client`:
//!
//! | Outcome | Action |
//! |---------|--------|
//! | Cache hit | Return immediately, no request |
//! | 2xx | Return; cache when status is 200 |
//! | 429 | `RateLimiter::handle_429`, retry outside the retry budget |
//! | 5xx, timeout, connect error | Back off `factor ^ n` seconds, retry up to `max_retries` |
//! | Other 4xx/3xx, other transport errors | Fail immediately |
//!
//! Every attempt, retries included, takes a rate-limiter permit first.

use crate::config::Config;
use crate::http::cache::CacheManager;
use crate::http::clock::Clock;
use crate::http::rate_limiter::RateLimiter;
use crate::http::retry::{RetryHandler, TransportKind, Verdict};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Fetch failures surfaced to the caller after retries are exhausted
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("could not connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} still throttled (429) after {attempts} cooldowns")]
    Throttled { url: String, attempts: u32 },

    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    /// True for network-level failures, false for HTTP-level ones
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Connect { .. } | Self::Request { .. }
        )
    }

    fn from_transport(url: &str, kind: TransportKind, error: &reqwest::Error) -> Self {
        match kind {
            TransportKind::Timeout => Self::Timeout {
                url: url.to_string(),
            },
            TransportKind::Connect => Self::Connect {
                url: url.to_string(),
                message: error.to_string(),
            },
            TransportKind::Other => Self::Request {
                url: url.to_string(),
                message: error.to_string(),
            },
        }
    }
}

/// A fetched page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// URL as requested (also the cache key)
    pub url: String,
    /// URL after redirects
    pub final_url: String,
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Default)]
struct ClientCounters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    retries: AtomicU64,
    throttled: AtomicU64,
    failures: AtomicU64,
}

/// Snapshot of client counters, recorded in the run metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpMetrics {
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub retries: u64,
    pub throttled: u64,
    pub failures: u64,
}

#[derive(Debug)]
pub struct HttpClient {
    client: Client,
    limiter: Arc<RateLimiter>,
    cache: Option<CacheManager>,
    retry: RetryHandler,
    clock: Arc<dyn Clock>,
    max_throttle_retries: u32,
    counters: ClientCounters,
}

/// Builds the pooled reqwest client from the transport settings
pub fn build_http_client(config: &Config) -> Result<Client, FetchError> {
    Client::builder()
        .user_agent(config.http.user_agent.clone())
        .timeout(config.http.timeout())
        .connect_timeout(config.http.connect_timeout())
        .pool_max_idle_per_host(config.http.pool_max_idle_per_host)
        .gzip(true)
        .brotli(true)
        .build()
        .map_err(|e| FetchError::Client(e.to_string()))
}

impl HttpClient {
    /// Creates a client with its own rate limiter and, when enabled, cache
    pub fn new(config: &Config, clock: Arc<dyn Clock>) -> Result<Self, FetchError> {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone(), clock.clone()));
        let cache = config.cache.enabled.then(|| {
            let cache = CacheManager::new(config.cache.clone(), clock.clone());
            // entries left by earlier processes count against this run's budget
            let expired = cache.cleanup_expired();
            let trimmed = cache.enforce_disk_budget();
            if expired + trimmed > 0 {
                debug!(
                    "Cache maintenance removed {} expired and {} over-budget entries",
                    expired, trimmed
                );
            }
            cache
        });

        Ok(Self::with_parts(
            build_http_client(config)?,
            limiter,
            cache,
            RetryHandler::from_config(&config.http),
            clock,
            config.http.max_throttle_retries,
        ))
    }

    /// Assembles a client from already-built parts
    pub fn with_parts(
        client: Client,
        limiter: Arc<RateLimiter>,
        cache: Option<CacheManager>,
        retry: RetryHandler,
        clock: Arc<dyn Clock>,
        max_throttle_retries: u32,
    ) -> Self {
        Self {
            client,
            limiter,
            cache,
            retry,
            clock,
            max_throttle_retries,
            counters: ClientCounters::default(),
        }
    }

    pub fn cache(&self) -> Option<&CacheManager> {
        self.cache.as_ref()
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Fetches `url`, returning a successful response or the last failure
    pub async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(url) {
                debug!("Cache hit: {}", url);
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(hit);
            }
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        let result = self.fetch_with_retries(url).await;
        if result.is_err() {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let mut retries = 0u32;
        let mut throttled = 0u32;

        loop {
            self.limiter.acquire().await;
            self.counters.requests.fetch_add(1, Ordering::Relaxed);

            let (verdict, outcome) = match self.send(url).await {
                Ok(response) => (self.retry.classify(Ok(response.status)), Ok(response)),
                Err((kind, error)) => (
                    self.retry.classify(Err(kind)),
                    Err(FetchError::from_transport(url, kind, &error)),
                ),
            };

            match verdict {
                Verdict::Success => {
                    let response = outcome?;
                    if response.status == 200 {
                        if let Some(cache) = &self.cache {
                            cache.set(url, &response);
                        }
                    }
                    return Ok(response);
                }
                Verdict::Throttled => {
                    throttled += 1;
                    self.counters.throttled.fetch_add(1, Ordering::Relaxed);
                    if throttled > self.max_throttle_retries {
                        return Err(FetchError::Throttled {
                            url: url.to_string(),
                            attempts: self.max_throttle_retries,
                        });
                    }
                    self.limiter.handle_429().await;
                }
                Verdict::Retryable => {
                    if !self.retry.has_budget(retries) {
                        return Err(into_error(url, outcome));
                    }
                    retries += 1;
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    let delay = self.retry.calculate_backoff(retries);
                    warn!(
                        "Retrying {} in {:?} (retry {}/{})",
                        url,
                        delay,
                        retries,
                        self.retry.max_retries()
                    );
                    self.clock.sleep(delay).await;
                }
                Verdict::Fatal => return Err(into_error(url, outcome)),
            }
        }
    }

    /// One network round trip
    async fn send(&self, url: &str) -> Result<HttpResponse, (TransportKind, reqwest::Error)> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| (TransportKind::of(&e), e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| (TransportKind::of(&e), e))?;

        Ok(HttpResponse {
            url: url.to_string(),
            final_url,
            status,
            body,
        })
    }

    /// Snapshot of request, cache, retry and throttle counters
    pub fn metrics(&self) -> HttpMetrics {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        HttpMetrics {
            requests: load(&self.counters.requests),
            cache_hits: load(&self.counters.cache_hits),
            cache_misses: load(&self.counters.cache_misses),
            retries: load(&self.counters.retries),
            throttled: load(&self.counters.throttled),
            failures: load(&self.counters.failures),
        }
    }
}

fn into_error(url: &str, outcome: Result<HttpResponse, FetchError>) -> FetchError {
    match outcome {
        Ok(response) => FetchError::Status {
            url: url.to_string(),
            status: response.status,
        },
        Err(error) => error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::clock::ManualClock;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(cache_dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.rate_limit.min_delay_ms = 0;
        config.rate_limit.requests_per_minute = 600;
        config.http.max_retries = 2;
        config.http.max_throttle_retries = 2;
        config.cache.directory = cache_dir.path().join("cache");
        config
    }

    fn client(config: &Config) -> (HttpClient, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let client = HttpClient::new(config, clock.clone()).unwrap();
        (client, clock)
    }

    #[tokio::test]
    async fn test_success_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/carros/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let (client, _) = client(&test_config(&dir));
        let url = format!("{}/carros/1", server.uri());

        let first = client.get(&url).await.unwrap();
        let second = client.get(&url).await.unwrap();

        assert_eq!(first.body, "<html>ok</html>");
        assert_eq!(first, second);
        let metrics = client.metrics();
        assert_eq!(metrics.requests, 1);
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.cache_misses, 1);
    }

    #[test]
    fn test_new_client_trims_cache_left_by_earlier_runs() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        let clock = Arc::new(ManualClock::new());

        let earlier = CacheManager::new(config.cache.clone(), clock.clone());
        for i in 0..6 {
            let key = format!("https://www.example.com/carros/{}", i);
            earlier.set(
                &key,
                &HttpResponse {
                    url: key.clone(),
                    final_url: key.clone(),
                    status: 200,
                    body: "<html></html>".to_string(),
                },
            );
        }
        drop(earlier);

        config.cache.max_entries = 3;
        let _client = HttpClient::new(&config, clock).unwrap();

        let files = std::fs::read_dir(&config.cache.directory).unwrap().count();
        assert_eq!(files, 3);
    }

    #[tokio::test]
    async fn test_503_is_retried_with_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let (client, clock) = client(&test_config(&dir));

        let response = client.get(&server.uri()).await.unwrap();
        assert_eq!(response.body, "recovered");
        assert_eq!(client.metrics().retries, 2);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test]
    async fn test_retries_exhausted_returns_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let (client, _) = client(&test_config(&dir));

        let err = client.get(&server.uri()).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 500, .. }));
        assert!(!err.is_transport());
        assert_eq!(client.metrics().failures, 1);
    }

    #[tokio::test]
    async fn test_404_is_not_retried_or_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let (client, clock) = client(&test_config(&dir));

        for _ in 0..2 {
            let err = client.get(&server.uri()).await.unwrap_err();
            assert!(matches!(err, FetchError::Status { status: 404, .. }));
        }
        assert_eq!(client.metrics().retries, 0);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_429_triggers_cooldown_outside_retry_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.http.max_retries = 0;
        let (client, clock) = client(&config);

        let response = client.get(&server.uri()).await.unwrap();
        assert_eq!(response.body, "ok");
        assert_eq!(client.metrics().throttled, 1);
        assert_eq!(client.metrics().retries, 0);
        assert_eq!(clock.sleeps()[0], Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_persistent_429_is_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let (client, _) = client(&test_config(&dir));

        let err = client.get(&server.uri()).await.unwrap_err();
        assert!(matches!(err, FetchError::Throttled { attempts: 2, .. }));
        assert_eq!(client.metrics().requests, 3);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.http.max_retries = 1;
        let (client, clock) = client(&config);

        // nothing listens on port 9 of localhost in the test environment
        let err = client.get("http://127.0.0.1:9/").await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
    }
}
