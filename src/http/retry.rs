//! Retry policy
//!
//! Pure decision functions: given what happened on an attempt, say whether it
//! succeeded, must be throttled, may be retried or has failed for good. The
//! client does the waiting.

use crate::config::HttpConfig;
use std::time::Duration;

/// Transport-level failure class, independent of the HTTP library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Timeout,
    Connect,
    Other,
}

impl TransportKind {
    pub fn of(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_connect() {
            Self::Connect
        } else {
            Self::Other
        }
    }
}

/// Classification of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// 2xx response, returned to the caller
    Success,
    /// 429, handled by the rate limiter outside the retry budget
    Throttled,
    /// Timeout, connection failure or 5xx
    Retryable,
    /// Anything else, returned as an error immediately
    Fatal,
}

#[derive(Debug, Clone)]
pub struct RetryHandler {
    max_retries: u32,
    backoff_factor: f64,
}

impl RetryHandler {
    pub fn new(max_retries: u32, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            backoff_factor,
        }
    }

    pub fn from_config(config: &HttpConfig) -> Self {
        Self::new(config.max_retries, config.backoff_factor)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Wait before retry number `attempt` (1-based): `backoff_factor ^ attempt` seconds
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        Duration::from_secs_f64(self.backoff_factor.powi(exponent))
    }

    /// Classifies an attempt from its HTTP status or transport failure
    pub fn classify(&self, outcome: Result<u16, TransportKind>) -> Verdict {
        match outcome {
            Ok(status) if (200..300).contains(&status) => Verdict::Success,
            Ok(429) => Verdict::Throttled,
            Ok(status) if (500..600).contains(&status) => Verdict::Retryable,
            Ok(_) => Verdict::Fatal,
            Err(TransportKind::Timeout) | Err(TransportKind::Connect) => Verdict::Retryable,
            Err(TransportKind::Other) => Verdict::Fatal,
        }
    }

    /// Whether a failed attempt is eligible for another try
    pub fn should_retry(&self, status: Option<u16>, transport: Option<TransportKind>) -> bool {
        let outcome = match (status, transport) {
            (_, Some(kind)) => Err(kind),
            (Some(status), None) => Ok(status),
            (None, None) => return false,
        };
        self.classify(outcome) == Verdict::Retryable
    }

    /// Whether another retry fits the budget after `retries_done` retries
    pub fn has_budget(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_exponential() {
        let handler = RetryHandler::new(3, 2.0);
        assert_eq!(handler.calculate_backoff(0), Duration::from_secs(1));
        assert_eq!(handler.calculate_backoff(1), Duration::from_secs(2));
        assert_eq!(handler.calculate_backoff(3), Duration::from_secs(8));

        let handler = RetryHandler::new(3, 1.5);
        assert_eq!(handler.calculate_backoff(2), Duration::from_secs_f64(2.25));
    }

    #[test]
    fn test_should_retry_timeout_and_5xx() {
        let handler = RetryHandler::new(3, 2.0);
        assert!(handler.should_retry(None, Some(TransportKind::Timeout)));
        assert!(handler.should_retry(None, Some(TransportKind::Connect)));
        assert!(handler.should_retry(Some(503), None));
        assert!(handler.should_retry(Some(500), None));
    }

    #[test]
    fn test_no_retry_on_4xx_or_success() {
        let handler = RetryHandler::new(3, 2.0);
        assert!(!handler.should_retry(Some(404), None));
        assert!(!handler.should_retry(Some(400), None));
        assert!(!handler.should_retry(Some(429), None));
        assert!(!handler.should_retry(Some(200), None));
        assert!(!handler.should_retry(None, Some(TransportKind::Other)));
        assert!(!handler.should_retry(None, None));
    }

    #[test]
    fn test_classify() {
        let handler = RetryHandler::new(3, 2.0);
        assert_eq!(handler.classify(Ok(200)), Verdict::Success);
        assert_eq!(handler.classify(Ok(204)), Verdict::Success);
        assert_eq!(handler.classify(Ok(429)), Verdict::Throttled);
        assert_eq!(handler.classify(Ok(502)), Verdict::Retryable);
        assert_eq!(handler.classify(Ok(301)), Verdict::Fatal);
        assert_eq!(handler.classify(Err(TransportKind::Timeout)), Verdict::Retryable);
    }

    #[test]
    fn test_budget() {
        let handler = RetryHandler::new(2, 2.0);
        assert!(handler.has_budget(0));
        assert!(handler.has_budget(1));
        assert!(!handler.has_budget(2));
    }
}
