//! Backoff for chat-completion calls.
//!
//! A failed summary is normally skipped until the next natural trigger, so
//! retries are off by default. When enabled, only failures that can succeed
//! on a second try are retried: rate limits, server errors, and network
//! trouble.

use std::time::Duration;

/// Doubling backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt. 0 disables retrying.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound for any single wait.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(750),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Wait before retry `attempt` (0-based): `base_delay * 2^attempt`,
    /// capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// HTTP status embedded in an error string as `HTTP <code>`.
fn http_status(error: &str) -> Option<u16> {
    let (_, rest) = error.split_once("HTTP ")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Whether a failed call is worth repeating.
///
/// Errors carrying an HTTP status are judged by it alone (429 and 5xx
/// retry). Others retry when they look like network failures.
pub fn is_transient_error(error: &str) -> bool {
    if let Some(status) = http_status(error) {
        return status == 429 || (500..600).contains(&status);
    }
    let lower = error.to_lowercase();
    ["request failed", "connection", "timed out", "timeout", "broken pipe"]
        .iter()
        .any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_by_default() {
        assert_eq!(RetryConfig::default().max_retries, 0);
        assert_eq!(RetryConfig::with_retries(3).max_retries, 3);
    }

    #[test]
    fn delay_doubles_until_cap() {
        let config = RetryConfig {
            max_retries: 8,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(1_000));
        assert_eq!(config.delay_for_attempt(40), Duration::from_millis(1_000));
    }

    #[test]
    fn status_codes_decide() {
        assert!(is_transient_error("chat API HTTP 429: slow down"));
        assert!(is_transient_error("chat API HTTP 502: bad gateway"));
        assert!(!is_transient_error("chat API HTTP 400: bad request"));
        assert!(!is_transient_error("chat API HTTP 401: connection refused upstream"));
        assert!(!is_transient_error("summarize API call failed: HTTP 404 Not Found"));
    }

    #[test]
    fn network_failures_retry() {
        assert!(is_transient_error("request failed: connection reset by peer"));
        assert!(is_transient_error("operation timed out"));
        assert!(!is_transient_error("failed to parse response: expected value"));
    }

    #[test]
    fn status_parsing() {
        assert_eq!(http_status("chat API HTTP 503: down"), Some(503));
        assert_eq!(http_status("HTTP x"), None);
        assert_eq!(http_status("no status"), None);
    }
}
