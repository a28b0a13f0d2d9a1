//! Retry classification and backoff.

use std::time::Duration;

/// Lower-case fragments that mark an error message as transient.
pub const RETRYABLE_ERROR_PATTERNS: &[&str] = &[
    "rate limit",
    "timeout",
    "network error",
    "quota exceeded",
    "service unavailable",
    "connection reset",
    "too many requests",
];

/// Whether a failure with this message is worth retrying.
///
/// Matching is a case-insensitive substring check against
/// [`RETRYABLE_ERROR_PATTERNS`].
pub fn is_retryable_message(message: &str) -> bool {
    let m = message.to_lowercase();
    RETRYABLE_ERROR_PATTERNS.iter().any(|p| m.contains(p))
}

/// Delay before retry number `retry_count` (1-based):
/// `retry_delay * 2^(retry_count - 1)`, saturating.
pub fn backoff_delay(retry_delay: Duration, retry_count: u32) -> Duration {
    let exponent = retry_count.saturating_sub(1);
    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    retry_delay.saturating_mul(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_messages() {
        let retryable = vec![
            "Rate limit exceeded",
            "request timeout after 30s",
            "Network error: dns failure",
            "Quota exceeded for project",
            "503 Service Unavailable",
            "connection reset by peer",
            "429 Too Many Requests",
        ];
        for message in retryable {
            assert!(
                is_retryable_message(message),
                "'{}' should be retryable",
                message
            );
        }
    }

    #[test]
    fn test_non_retryable_messages() {
        for message in ["invalid api key", "400 bad request", "model not found", ""] {
            assert!(
                !is_retryable_message(message),
                "'{}' should not be retryable",
                message
            );
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_saturates() {
        let d = backoff_delay(Duration::from_secs(1), 64);
        assert_eq!(d, Duration::from_secs(1).saturating_mul(u32::MAX));
    }
}
