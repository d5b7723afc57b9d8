//! Execution Timeout Management
//!
//! Bounds how long a foreground command may hold its caller.

use std::time::Duration;
use tokio::time;

/// Error returned when a wait exceeds its bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Command execution timed out after {0:?}")]
pub struct TimedOut(pub Duration);

/// Execution timeout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionTimeout {
    duration: Duration,
}

impl Default for ExecutionTimeout {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl ExecutionTimeout {
    /// Create a new execution timeout
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use codeflow_sandbox::tools::ExecutionTimeout;
    ///
    /// let timeout = ExecutionTimeout::new(Duration::from_secs(30));
    /// assert_eq!(timeout.duration(), Duration::from_secs(30));
    /// ```
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Create a timeout from seconds
    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Drive `future` to completion or give up after the configured duration
    ///
    /// The future is dropped on expiry; anything it owns (such as a child
    /// process spawned with `kill_on_drop`) is released with it.
    pub async fn run<F>(&self, future: F) -> Result<F::Output, TimedOut>
    where
        F: std::future::Future,
    {
        time::timeout(self.duration, future)
            .await
            .map_err(|_| TimedOut(self.duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_default() {
        let timeout = ExecutionTimeout::default();
        assert_eq!(timeout.duration(), Duration::from_secs(60));
    }

    #[test]
    fn test_timeout_from_secs() {
        let timeout = ExecutionTimeout::from_secs(45);
        assert_eq!(timeout.duration(), Duration::from_secs(45));
    }

    #[tokio::test]
    async fn test_timeout_run_success() {
        let timeout = ExecutionTimeout::from_secs(5);
        let result = timeout.run(async { "test value" }).await;
        assert_eq!(result, Ok("test value"));
    }

    #[tokio::test]
    async fn test_timeout_run_timeout() {
        let timeout = ExecutionTimeout::new(Duration::from_millis(50));

        let result = timeout
            .run(async {
                tokio::time::sleep(Duration::from_secs(2)).await;
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err, TimedOut(Duration::from_millis(50)));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_timeout_passes_inner_error_through() {
        let timeout = ExecutionTimeout::from_secs(5);
        let result = timeout.run(async { Err::<(), &str>("inner") }).await;
        assert_eq!(result, Ok(Err("inner")));
    }
}
