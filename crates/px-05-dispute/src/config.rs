//! Dispute escalation configuration

use std::time::Duration;

/// Tuning of the dispute result matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisputeConfig {
    /// Delay before an unmatched result is looked up again.
    pub result_retry_delay: Duration,
    /// Delayed lookups after the first miss before the result is dropped.
    pub max_result_retries: u32,
}

impl Default for DisputeConfig {
    fn default() -> Self {
        Self {
            result_retry_delay: Duration::from_secs(2),
            max_result_retries: 1,
        }
    }
}
