/// Outcome of one admission call against the sliding-window limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,

    /// Epoch milliseconds at which the oldest admitted request leaves the
    /// window.
    pub reset_ms: u64,
}

impl RateLimitDecision {
    pub fn reset_unix_seconds(&self) -> u64 {
        self.reset_ms / 1_000
    }

    /// Whole seconds the client should wait before retrying, rounded up.
    pub fn retry_after_seconds(&self, now_ms: u64) -> u64 {
        self.reset_ms.saturating_sub(now_ms).div_ceil(1_000)
    }
}
