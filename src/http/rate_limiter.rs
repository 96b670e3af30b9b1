//! Global politeness budget
//!
//! One `RateLimiter` is shared by every worker. `acquire` holds the internal
//! lock while it waits, so callers are granted permits one at a time and the
//! aggregate rate never depends on the worker count.
//!
//! Three constraints must all hold before a permit is granted:
//!
//! 1. token bucket: capacity `requests_per_minute`, refilled continuously
//! 2. minimum delay since the previous grant (divided by the business-hours
//!    factor inside the business-hours window)
//! 3. rolling window: at most `requests_per_minute` grants in any 60 seconds

use crate::config::RateLimitConfig;
use crate::http::clock::Clock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const WINDOW: Duration = Duration::from_secs(60);

// tolerance for float drift in the token count
const TOKEN_EPSILON: f64 = 1e-9;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    last_grant: Option<Instant>,
    grants: VecDeque<Instant>,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
    granted: AtomicU64,
    throttle_events: AtomicU64,
}

impl RateLimiter {
    /// Creates a limiter with a full bucket
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let capacity = config.requests_per_minute as f64;
        Self {
            config,
            clock,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
                last_grant: None,
                grants: VecDeque::new(),
            }),
            granted: AtomicU64::new(0),
            throttle_events: AtomicU64::new(0),
        }
    }

    fn capacity(&self) -> f64 {
        self.config.requests_per_minute as f64
    }

    fn refill_per_sec(&self) -> f64 {
        self.config.requests_per_minute as f64 / 60.0
    }

    /// Minimum spacing between grants at the current local hour
    pub fn effective_min_delay(&self) -> Duration {
        let base = self.config.min_delay();
        if self.config.is_business_hour(self.clock.local_hour()) {
            Duration::from_secs_f64(base.as_secs_f64() / self.config.business_hours_factor)
        } else {
            base
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens =
            (state.tokens + elapsed.as_secs_f64() * self.refill_per_sec()).min(self.capacity());
        state.last_refill = now;
    }

    /// How long the caller must still wait, zero when a permit can be granted now
    fn required_wait(&self, state: &mut BucketState, now: Instant) -> Duration {
        while let Some(oldest) = state.grants.front() {
            if now.saturating_duration_since(*oldest) >= WINDOW {
                state.grants.pop_front();
            } else {
                break;
            }
        }

        let token_wait = if state.tokens + TOKEN_EPSILON >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec())
        };

        let delay_wait = match state.last_grant {
            Some(last) => (last + self.effective_min_delay()).saturating_duration_since(now),
            None => Duration::ZERO,
        };

        let window_wait = if state.grants.len() >= self.config.requests_per_minute as usize {
            state
                .grants
                .front()
                .map(|oldest| (*oldest + WINDOW).saturating_duration_since(now))
                .unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        };

        token_wait.max(delay_wait).max(window_wait)
    }

    /// Waits until one more request may be sent, then consumes a permit
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;

        loop {
            let now = self.clock.now();
            self.refill(&mut state, now);

            let wait = self.required_wait(&mut state, now);
            if wait.is_zero() {
                state.tokens = (state.tokens - 1.0).max(0.0);
                state.last_grant = Some(now);
                state.grants.push_back(now);
                self.granted.fetch_add(1, Ordering::Relaxed);
                return;
            }

            debug!("Rate limiter waiting {:?}", wait);
            self.clock.sleep(wait).await;
        }
    }

    /// Reacts to an explicit "too many requests" signal from the source
    ///
    /// Drains the bucket and, when throttle signals are respected, holds every
    /// caller for the configured cooldown.
    pub async fn handle_429(&self) {
        self.throttle_events.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().await;

        if self.config.respect_throttle_signals {
            let cooldown = self.config.throttle_cooldown();
            warn!("Source signalled throttling, cooling down for {:?}", cooldown);
            self.clock.sleep(cooldown).await;
        }

        state.tokens = 0.0;
        state.last_refill = self.clock.now();
    }

    /// Tokens currently in the bucket (after refill)
    pub async fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        self.refill(&mut state, now);
        state.tokens
    }

    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }

    pub fn throttle_events(&self) -> u64 {
        self.throttle_events.load(Ordering::Relaxed)
    }
}
