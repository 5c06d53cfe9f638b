use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// How many times a failed model call is repeated and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Total waiting allowed across all retries of one call; `0` means unbounded.
    pub budget_ms: u64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 250,
            max_delay_ms: 16_000,
            budget_ms: 60_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn schedule(&self) -> RetrySchedule {
        RetrySchedule {
            policy: *self,
            started: Instant::now(),
            waited_ms: 0,
            attempt: 0,
            rng: seed(),
        }
    }

    /// Exponential delay for the zero-based `attempt`, before jitter.
    pub fn backoff_ms(&self, attempt: usize) -> u64 {
        let factor = 1_u64.checked_shl(attempt.min(32) as u32).unwrap_or(u64::MAX);
        self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms.max(self.base_delay_ms))
    }
}

/// Per-call retry state. Each `next_delay` call consumes one retry.
#[derive(Debug)]
pub struct RetrySchedule {
    policy: RetryPolicy,
    started: Instant,
    waited_ms: u64,
    attempt: usize,
    rng: u64,
}

impl RetrySchedule {
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// `server_hint_ms` (from `Retry-After`) raises the delay but never lowers it.
    pub fn next_delay(&mut self, server_hint_ms: Option<u64>) -> Option<Duration> {
        if self.attempt >= self.policy.max_retries {
            return None;
        }
        let mut delay_ms = self.policy.backoff_ms(self.attempt);
        if self.policy.jitter && delay_ms > 1 {
            let half = delay_ms / 2;
            delay_ms = half + self.next_random() % (delay_ms - half + 1);
        }
        if let Some(hint) = server_hint_ms {
            delay_ms = delay_ms.max(hint);
        }
        if self.policy.budget_ms > 0 {
            let spent = self.waited_ms.max(self.started.elapsed().as_millis() as u64);
            if spent.saturating_add(delay_ms) > self.policy.budget_ms {
                return None;
            }
        }
        self.waited_ms = self.waited_ms.saturating_add(delay_ms);
        self.attempt += 1;
        Some(Duration::from_millis(delay_ms))
    }

    fn next_random(&mut self) -> u64 {
        // xorshift64*
        self.rng ^= self.rng >> 12;
        self.rng ^= self.rng << 25;
        self.rng ^= self.rng >> 27;
        self.rng.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}

fn seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0);
    (nanos ^ u64::from(std::process::id())) | 1
}
