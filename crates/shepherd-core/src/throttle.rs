//! Batch submission throttling (spec §4.8): "two-layer throttling applies
//! (global: pending parents + API rate; per-user: pending parents/children +
//! cooldown); threshold breach returns a retryable rejection with a
//! retry-after hint."
//!
//! This module is pure: the caller counts rows and passes them in, the same
//! shape as [`crate::rbac`]'s pure evaluator over caller-supplied grants.

use chrono::{DateTime, Utc};

use crate::error::Error;

/// Thresholds for the two throttle layers. Defaults are deliberately
/// conservative placeholders (SPEC_FULL.md §9's Open Question resolution:
/// the spec names the two layers but not their numeric thresholds).
#[derive(Debug, Clone, Copy)]
pub struct BatchThrottleConfig {
    pub max_global_pending_parents: i64,
    pub max_user_pending_parents: i64,
    pub max_user_pending_children: i64,
    pub user_cooldown: chrono::Duration,
}

impl Default for BatchThrottleConfig {
    fn default() -> Self {
        Self {
            max_global_pending_parents: 50,
            max_user_pending_parents: 3,
            max_user_pending_children: 25,
            user_cooldown: chrono::Duration::seconds(30),
        }
    }
}

/// Observed counts a caller gathers (inside the submit transaction, so the
/// decision is consistent with whatever it ultimately inserts) before
/// calling [`check`].
#[derive(Debug, Clone, Copy)]
pub struct BatchThrottleCounts {
    pub global_pending_parents: i64,
    pub user_pending_parents: i64,
    pub user_pending_children: i64,
    pub user_last_batch_submitted_at: Option<DateTime<Utc>>,
}

/// Evaluates both throttle layers, in the order a caller would most like to
/// see them reported: global capacity first (nothing any one user can do
/// about it), then the per-user layer.
pub fn check(counts: BatchThrottleCounts, config: &BatchThrottleConfig, now: DateTime<Utc>) -> Result<(), Error> {
    if counts.global_pending_parents >= config.max_global_pending_parents {
        return Err(Error::Throttled {
            retry_after_seconds: 60,
        });
    }
    if counts.user_pending_parents >= config.max_user_pending_parents {
        return Err(Error::Throttled {
            retry_after_seconds: 30,
        });
    }
    if counts.user_pending_children >= config.max_user_pending_children {
        return Err(Error::Throttled {
            retry_after_seconds: 30,
        });
    }
    if let Some(last) = counts.user_last_batch_submitted_at {
        let elapsed = now - last;
        if elapsed < config.user_cooldown {
            let remaining = (config.user_cooldown - elapsed).num_seconds().max(1) as u64;
            return Err(Error::Throttled {
                retry_after_seconds: remaining,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts() -> BatchThrottleCounts {
        BatchThrottleCounts {
            global_pending_parents: 0,
            user_pending_parents: 0,
            user_pending_children: 0,
            user_last_batch_submitted_at: None,
        }
    }

    #[test]
    fn under_every_threshold_passes() {
        let config = BatchThrottleConfig::default();
        assert!(check(counts(), &config, Utc::now()).is_ok());
    }

    #[test]
    fn global_pending_parents_at_threshold_is_throttled() {
        let config = BatchThrottleConfig::default();
        let mut c = counts();
        c.global_pending_parents = config.max_global_pending_parents;
        assert!(matches!(check(c, &config, Utc::now()), Err(Error::Throttled { .. })));
    }

    #[test]
    fn user_pending_parents_at_threshold_is_throttled() {
        let config = BatchThrottleConfig::default();
        let mut c = counts();
        c.user_pending_parents = config.max_user_pending_parents;
        assert!(matches!(check(c, &config, Utc::now()), Err(Error::Throttled { .. })));
    }

    #[test]
    fn cooldown_not_yet_elapsed_is_throttled() {
        let config = BatchThrottleConfig::default();
        let now = Utc::now();
        let mut c = counts();
        c.user_last_batch_submitted_at = Some(now - chrono::Duration::seconds(5));
        assert!(matches!(check(c, &config, now), Err(Error::Throttled { .. })));
    }

    #[test]
    fn cooldown_elapsed_passes() {
        let config = BatchThrottleConfig::default();
        let now = Utc::now();
        let mut c = counts();
        c.user_last_batch_submitted_at = Some(now - chrono::Duration::seconds(31));
        assert!(check(c, &config, now).is_ok());
    }
}
