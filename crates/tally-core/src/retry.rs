//! Fixed backoff schedule for transient failures.
//!
//! The first attempt runs immediately. After each retriable failure the next
//! delay in the schedule is slept and the operation runs again, until
//! `max_attempts` runs have failed. With the default schedule `{1s, 3s, 5s}`
//! an operation runs at most three times: immediately, after 1s, after 3s.
//! The trailing 5s delay is never slept.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Delays slept between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
    max_attempts: usize,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(3),
            Duration::from_secs(5),
        ])
    }
}

impl RetrySchedule {
    /// One attempt per delay in the schedule, at least one in total.
    pub fn new(delays: Vec<Duration>) -> Self {
        let max_attempts = delays.len().max(1);
        Self {
            delays,
            max_attempts,
        }
    }

    /// Cap the number of runs. Values below one are raised to one.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// A schedule that never retries.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Upper bound on how many times an operation runs.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Run `op` until it succeeds, fails with a non-retriable error, or the
    /// schedule runs out.
    ///
    /// Dropping the returned future aborts any pending backoff sleep, which
    /// is how callers cancel a retry loop.
    pub async fn run<T, E, F, Fut>(
        &self,
        what: &str,
        is_retriable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut delays = self.delays.iter();
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if !is_retriable(&e) || attempt >= self.max_attempts {
                        return Err(e);
                    }
                    let Some(delay) = delays.next() else {
                        return Err(e);
                    };
                    warn!(
                        %what,
                        attempt,
                        max_attempts = self.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(*delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient,
        Fatal,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn transient(e: &TestError) -> bool {
        *e == TestError::Transient
    }

    #[test]
    fn default_schedule_is_one_three_five() {
        let schedule = RetrySchedule::default();
        assert_eq!(
            schedule.delays(),
            &[
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5)
            ]
        );
        assert_eq!(schedule.max_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_first_try_without_sleeping() {
        let start = tokio::time::Instant::now();
        let calls = Cell::new(0);
        let out: Result<u32, TestError> = RetrySchedule::default()
            .run("test", transient, || {
                calls.set(calls.get() + 1);
                async { Ok(7) }
            })
            .await;
        assert_eq!(out, Ok(7));
        assert_eq!(calls.get(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let start = tokio::time::Instant::now();
        let calls = Cell::new(0);
        let out: Result<&str, TestError> = RetrySchedule::default()
            .run("test", transient, || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 3 {
                        Err(TestError::Transient)
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;
        assert_eq!(out, Ok("done"));
        assert_eq!(calls.get(), 3);
        // 1s after the first failure, 3s after the second.
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_schedule() {
        let start = tokio::time::Instant::now();
        let calls = Cell::new(0);
        let out: Result<(), TestError> = RetrySchedule::default()
            .run("test", transient, || {
                calls.set(calls.get() + 1);
                async { Err(TestError::Transient) }
            })
            .await;
        assert_eq!(out, Err(TestError::Transient));
        assert_eq!(calls.get(), 3);
        // Sleeps of 1s and 3s; nothing runs after the 5s slot.
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn max_attempts_caps_runs() {
        let calls = Cell::new(0);
        let out: Result<(), TestError> = RetrySchedule::default()
            .with_max_attempts(2)
            .run("test", transient, || {
                calls.set(calls.get() + 1);
                async { Err(TestError::Transient) }
            })
            .await;
        assert!(out.is_err());
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_stops_immediately() {
        let calls = Cell::new(0);
        let out: Result<(), TestError> = RetrySchedule::default()
            .run("test", transient, || {
                calls.set(calls.get() + 1);
                async { Err(TestError::Fatal) }
            })
            .await;
        assert_eq!(out, Err(TestError::Fatal));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn none_schedule_runs_once() {
        let calls = Cell::new(0);
        let out: Result<(), TestError> = RetrySchedule::none()
            .run("test", transient, || {
                calls.set(calls.get() + 1);
                async { Err(TestError::Transient) }
            })
            .await;
        assert!(out.is_err());
        assert_eq!(calls.get(), 1);
    }
}
