// Reconnect backoff policy

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff without jitter: `min(base * 2^attempt, cap)`
///
/// The policy holds no attempt counter. Callers own the counter and ask for
/// the delay that belongs to it, which keeps the policy a pure function.
///
/// # Example
///
/// ```
/// use tidings_core::BackoffPolicy;
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::default();
///
/// assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
/// assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
/// assert_eq!(policy.delay_for_attempt(9), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    #[serde(rename = "base_ms", with = "duration_millis")]
    pub base: Duration,

    /// Upper bound for any single delay
    #[serde(rename = "cap_ms", with = "duration_millis")]
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl BackoffPolicy {
    /// 1 second base, 30 second cap
    pub fn exponential() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }

    /// Set the base delay
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Set the delay cap
    pub fn with_cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    /// Delay to wait after `attempt` consecutive failures (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
