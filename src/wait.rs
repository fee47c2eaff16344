//! Convergence polling
//!
//! Re-evaluates a predicate on a fixed cadence until it holds or a deadline
//! passes. Used for scale-and-wait, rolling updates and any other
//! "block until the cluster agrees" step.
//!
//! # Example
//!
//! ```ignore
//! use sovitin::wait::converge;
//! use std::time::Duration;
//!
//! converge("scale app-rc to 3 pods")
//!     .timeout(Duration::from_secs(120))
//!     .interval(Duration::from_secs(1))
//!     .until(|| async { Ok::<_, AdapterError>(ready_replicas().await? == 3) })
//!     .await?;
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Raised when a convergence predicate never held within its timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergenceTimeout {
    /// What we were waiting for (e.g., "scale app-rc to 5 pods")
    pub description: String,
    /// How long we waited before giving up
    pub elapsed: Duration,
    /// The timeout that was configured
    pub timeout: Duration,
    /// Number of predicate evaluations
    pub attempts: u32,
}

impl fmt::Display for ConvergenceTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Timeout waiting for {}", self.description)?;
        writeln!(f, "├─ Attempts: {}", self.attempts)?;
        writeln!(f, "├─ Elapsed: {:?}", self.elapsed)?;
        write!(f, "└─ Timeout: {:?}", self.timeout)
    }
}

impl std::error::Error for ConvergenceTimeout {}

/// Builder for a convergence wait
#[derive(Debug, Clone)]
pub struct Convergence {
    description: String,
    timeout: Duration,
    interval: Duration,
}

/// Start building a convergence wait
///
/// Default timeout: 60 seconds
/// Default interval: 1 second
pub fn converge(description: impl Into<String>) -> Convergence {
    Convergence {
        description: description.into(),
        timeout: Duration::from_secs(60),
        interval: Duration::from_secs(1),
    }
}

impl Convergence {
    /// Set the timeout duration
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the polling interval
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll `predicate` until it returns `Ok(true)` or the timeout elapses
    ///
    /// The first check runs immediately, later checks are spaced by the
    /// interval. An `Err` from the predicate is returned as-is on the spot.
    /// Returns the elapsed time on success.
    pub async fn until<F, Fut, E>(self, mut predicate: F) -> Result<Duration, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
        E: From<ConvergenceTimeout>,
    {
        let start = Instant::now();
        let mut attempts = 0u32;

        debug!(
            description = %self.description,
            timeout = ?self.timeout,
            interval = ?self.interval,
            "Starting convergence wait"
        );

        loop {
            attempts += 1;

            if predicate().await? {
                let elapsed = start.elapsed();
                debug!(
                    description = %self.description,
                    attempts = attempts,
                    elapsed = ?elapsed,
                    "Converged"
                );
                return Ok(elapsed);
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                return Err(ConvergenceTimeout {
                    description: self.description,
                    elapsed,
                    timeout: self.timeout,
                    attempts,
                }
                .into());
            }

            debug!(
                description = %self.description,
                attempts = attempts,
                elapsed = ?elapsed,
                "Not converged yet, waiting..."
            );

            sleep(self.interval).await;
        }
    }
}
