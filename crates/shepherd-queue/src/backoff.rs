//! Exponential backoff for retried jobs (spec §4.6).

use chrono::Duration;

const BASE_SECONDS: i64 = 5;
const MAX_SECONDS: i64 = 15 * 60;

/// The delay before a job's `attempt`-th retry becomes eligible for
/// redelivery: `base * 2^(attempt - 1)`, capped at `MAX_SECONDS`.
pub fn delay_for_attempt(attempt: i32) -> Duration {
    let exponent = attempt.max(1) - 1;
    let seconds = BASE_SECONDS.saturating_mul(1i64.checked_shl(exponent as u32).unwrap_or(i64::MAX));
    Duration::seconds(seconds.min(MAX_SECONDS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(delay_for_attempt(1), Duration::seconds(5));
        assert_eq!(delay_for_attempt(2), Duration::seconds(10));
        assert_eq!(delay_for_attempt(3), Duration::seconds(20));
        assert_eq!(delay_for_attempt(20), Duration::seconds(MAX_SECONDS));
    }
}
