//! Retry policy: decides whether a failed task gets another attempt and
//! when the deferred retry wave runs.
//!
//! A batch that settles with failures gets exactly one deferred wave,
//! `retry_delay` after it settles. There is no backoff ladder; further waves
//! come from an operator force-retry.

use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::domain::{TaskStatus, YieldDistributionTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts allowed per task.
    pub max_retry_count: u32,

    /// Delay between a batch settling and its retry wave.
    pub retry_delay: chrono::Duration,
}

/// What to do with a task after an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Not failed; nothing to do.
    Settled,

    /// Re-execute in the wave due at `due_at`.
    Retry { due_at: DateTime<Utc> },

    /// Budget spent; needs an operator.
    GiveUp { reason: String },
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_retry_count: config.max_retry_count,
            retry_delay: config.retry_delay(),
        }
    }

    pub fn next_wave_at(&self, settled_at: DateTime<Utc>) -> DateTime<Utc> {
        settled_at + self.retry_delay
    }

    pub fn decide(&self, task: &YieldDistributionTask, now: DateTime<Utc>) -> RetryDecision {
        if task.status != TaskStatus::Failed {
            return RetryDecision::Settled;
        }
        if task.can_retry(self.max_retry_count) {
            RetryDecision::Retry {
                due_at: self.next_wave_at(now),
            }
        } else {
            RetryDecision::GiveUp {
                reason: format!(
                    "retries exhausted: {}/{}",
                    task.retry_count, self.max_retry_count
                ),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BatchId, PositionId, UserId};
    use crate::testing::start_time;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn failed_task(failures: u32) -> YieldDistributionTask {
        let mut t = YieldDistributionTask::new(
            BatchId::new("batch-20260301"),
            PositionId::new("p-1"),
            UserId::new("u-1"),
            dec!(1),
            start_time(),
        );
        for _ in 0..failures {
            t.mark_failed("x".into());
        }
        t
    }

    #[test]
    fn default_policy_matches_engine_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retry_count, 3);
        assert_eq!(policy.retry_delay, chrono::Duration::minutes(5));
    }

    #[rstest]
    #[case::one_failure(1)]
    #[case::two_failures(2)]
    fn retries_within_budget(#[case] failures: u32) {
        let policy = RetryPolicy::default();
        let now = start_time();
        assert_eq!(
            policy.decide(&failed_task(failures), now),
            RetryDecision::Retry {
                due_at: now + chrono::Duration::minutes(5)
            }
        );
    }

    #[test]
    fn gives_up_at_max() {
        let policy = RetryPolicy::default();
        let decision = policy.decide(&failed_task(3), start_time());
        assert!(matches!(decision, RetryDecision::GiveUp { reason } if reason.contains("3/3")));
    }

    #[test]
    fn pending_task_is_not_a_retry_candidate() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(&failed_task(0), start_time()), RetryDecision::Settled);
    }
}
