use std::future::Future;
use std::time::Duration;

/// Bounded retry with a linear delay (`attempt × step`) and a caller-supplied
/// retryability predicate.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            step: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            step,
        }
    }

    /// Delay after the given 1-based attempt failed.
    pub fn delay_after(&self, attempt: usize) -> Duration {
        self.step * attempt as u32
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or attempts run out.
    /// `op` receives the 1-based attempt number. The last error is returned.
    pub async fn run<F, Fut, T, E, P>(&self, mut op: F, retryable: P) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if attempt >= self.max_attempts || !retryable(&e) {
                        return Err(e);
                    }
                    tokio::time::sleep(self.delay_after(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}
