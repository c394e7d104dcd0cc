/*!

Fixed-interval polling. A callback is invoked until it returns `Ok` or the budget runs out, at
which point the last error is returned wrapped in [`Error::AwaitExhausted`].

!*/

use crate::error::{Error, Result};
use futures::future::{try_join_all, BoxFuture};
use log::{debug, trace};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// The pause between two attempts unless the caller picks another one.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// How long an await may keep trying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// Give up after this many attempts.
    Tries(u32),
    /// Give up once another attempt would start after this much time has passed.
    Within(Duration),
}

/// Where a single await is after its latest attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwaitState {
    /// No attempt has finished yet.
    Pending,
    Success,
    /// The last attempt failed and the budget allows another one.
    Retry,
    /// The last attempt failed and the budget is spent.
    Failed,
}

impl Budget {
    /// The state after `attempts` attempts, the last of which finished `elapsed` after the start.
    pub fn state_after(
        &self,
        attempts: u32,
        elapsed: Duration,
        interval: Duration,
        last_ok: Option<bool>,
    ) -> AwaitState {
        match last_ok {
            None => AwaitState::Pending,
            Some(true) => AwaitState::Success,
            Some(false) => {
                let exhausted = match self {
                    Budget::Tries(tries) => attempts >= *tries,
                    Budget::Within(within) => elapsed + interval > *within,
                };
                if exhausted {
                    AwaitState::Failed
                } else {
                    AwaitState::Retry
                }
            }
        }
    }
}

/// A named, reusable polling policy.
#[derive(Debug, Clone)]
pub struct Await {
    what: String,
    budget: Budget,
    interval: Duration,
}

impl Await {
    pub fn new<S>(what: S, budget: Budget) -> Self
    where
        S: Into<String>,
    {
        Self {
            what: what.into(),
            budget,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Calls `callback` until it succeeds or the budget is spent.
    pub async fn run<T, F, Fut>(&self, mut callback: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let error = match callback().await {
                Ok(value) => {
                    trace!("'{}' succeeded after {} attempt(s)", self.what, attempts);
                    return Ok(value);
                }
                Err(e) => e,
            };
            let elapsed = start.elapsed();
            match self
                .budget
                .state_after(attempts, elapsed, self.interval, Some(false))
            {
                AwaitState::Failed => {
                    return Err(Error::AwaitExhausted {
                        what: self.what.clone(),
                        attempts,
                        elapsed,
                        source: Box::new(error),
                    })
                }
                _ => {
                    debug!(
                        "'{}' attempt {} failed, retrying in {:?}: {}",
                        self.what, attempts, self.interval, error
                    );
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }
}

/// Retries `callback` at a one-second interval until it succeeds or `within` has passed.
pub async fn eventually<T, F, Fut>(what: &str, within: Duration, callback: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    Await::new(what, Budget::Within(within)).run(callback).await
}

/// Retries `callback` at most `tries` times, sleeping `interval` between attempts.
pub async fn retry<T, F, Fut>(what: &str, tries: u32, interval: Duration, callback: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    Await::new(what, Budget::Tries(tries))
        .interval(interval)
        .run(callback)
        .await
}

/// A named check that `await_all` drives concurrently.
pub type Check<'a> = (String, BoxFuture<'a, Result<()>>);

/// Runs every check concurrently and returns the first failure. Each check is expected to carry
/// its own await.
pub async fn await_all(checks: Vec<Check<'_>>) -> Result<()> {
    let futures = checks.into_iter().map(|(name, check)| async move {
        debug!("Starting check '{}'", name);
        check.await?;
        debug!("Check '{}' passed", name);
        Ok::<(), Error>(())
    });
    try_join_all(futures).await.map(|_| ())
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=
