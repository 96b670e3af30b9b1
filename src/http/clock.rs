//! Time source and sleeper
//!
//! Rate limiting, backoff and cache expiry read time and sleep only through a
//! `Clock`, so tests can drive them with a `ManualClock` instead of waiting.

use async_trait::async_trait;
use chrono::{DateTime, Local, Timelike, Utc};
use std::fmt::Debug;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[async_trait]
pub trait Clock: Send + Sync + Debug {
    /// Monotonic time, used for intervals
    fn now(&self) -> Instant;

    /// Wall-clock time, used for timestamps and TTLs
    fn utc_now(&self) -> DateTime<Utc>;

    /// Local hour of day (0-23), used for the business-hours window
    fn local_hour(&self) -> u32;

    async fn sleep(&self, duration: Duration);
}

/// Real time, backed by tokio timers
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_hour(&self) -> u32 {
        Local::now().hour()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual time that only moves when someone sleeps or calls `advance`
///
/// Every requested sleep is recorded so tests can assert on waits.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    utc_origin: DateTime<Utc>,
    start_hour: u32,
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    /// Starts at the current wall-clock time, outside business hours (03:00 local)
    pub fn new() -> Self {
        Self::starting_at(Utc::now(), 3)
    }

    pub fn starting_at(utc: DateTime<Utc>, local_hour: u32) -> Self {
        Self {
            origin: Instant::now(),
            utc_origin: utc,
            start_hour: local_hour % 24,
            state: Mutex::new(ManualState::default()),
        }
    }

    /// Moves time forward without recording a sleep
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.elapsed += duration;
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.state.lock().map(|s| s.elapsed).unwrap_or_default()
    }

    /// Every sleep requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state
            .lock()
            .map(|s| s.sleeps.clone())
            .unwrap_or_default()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.utc_origin + elapsed
    }

    fn local_hour(&self) -> u32 {
        let hours = self.elapsed().as_secs() / 3600;
        ((self.start_hour as u64 + hours) % 24) as u32
    }

    async fn sleep(&self, duration: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.elapsed += duration;
            state.sleeps.push(duration);
        }
        // let other tasks observe the new time
        tokio::task::yield_now().await;
    }
}
