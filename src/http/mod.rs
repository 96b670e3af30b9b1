//! HTTP resilience layer
//!
//! - `Clock`: injected time source and sleeper
//! - `RateLimiter`: global token bucket plus minimum spacing and a rolling window
//! - `CacheManager`: memory + disk response cache with TTL and LRU eviction
//! - `RetryHandler`: pure retry/backoff decisions
//! - `HttpClient`: the single fetch primitive composing all of the above

mod cache;
mod client;
mod clock;
mod rate_limiter;
mod retry;

pub use cache::{CacheError, CacheManager};
pub use client::{build_http_client, FetchError, HttpClient, HttpMetrics, HttpResponse};
pub use clock::{Clock, ManualClock, SystemClock};
pub use rate_limiter::RateLimiter;
pub use retry::{RetryHandler, TransportKind, Verdict};
