use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::{BubbleError, BubbleResult};

/// Exponential backoff applied uniformly by every backend adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    #[serde(default = "default_cap_ms")]
    pub cap_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_ms() -> u64 {
    500
}

fn default_factor() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

fn default_cap_ms() -> u64 {
    8_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: default_max_attempts(),
            base_ms: default_base_ms(),
            factor: default_factor(),
            jitter: default_jitter(),
            cap_ms: default_cap_ms(),
        }
    }
}

/// Final error of a retried operation together with how many attempts ran.
#[derive(Debug)]
pub struct Exhausted {
    pub attempts: u32,
    pub error: BubbleError,
}

impl RetryPolicy {
    /// No waiting between attempts; used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts,
            base_ms: 0,
            factor: 1.0,
            jitter: 0.0,
            cap_ms: 0,
        }
    }

    pub fn allowed(&self, attempts: u32) -> bool {
        attempts < self.max_attempts.max(1)
    }

    /// Delay before the attempt following `attempts` completed attempts.
    pub fn delay_after(&self, attempts: u32) -> Duration {
        if attempts == 0 || self.base_ms == 0 {
            return Duration::ZERO;
        }
        let exponent = attempts.saturating_sub(1) as i32;
        let exp_delay = self.base_ms as f64 * self.factor.powi(exponent);
        let capped = exp_delay.min(self.cap_ms as f64);
        let jitter_factor = if self.jitter > 0.0 {
            let span = self.jitter.abs();
            1.0 + (rand::thread_rng().gen::<f64>() * 2.0 - 1.0) * span
        } else {
            1.0
        };
        let candidate = (capped * jitter_factor).max(0.0);
        Duration::from_millis(candidate.round() as u64)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt bound is reached.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        retryable: impl Fn(&BubbleError) -> bool,
        mut op: F,
    ) -> Result<T, Exhausted>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = BubbleResult<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op(attempts).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !retryable(&error) || !self.allowed(attempts) {
                        return Err(Exhausted { attempts, error });
                    }
                    let delay = self.delay_after(attempts);
                    tracing::warn!(
                        operation,
                        attempt = attempts,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
