use crate::error::{AgentError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

/// Deadline shared by every outbound call made during one tick.
#[derive(Debug, Clone, Copy)]
pub struct TickContext {
    deadline: Instant,
}

impl TickContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
        }
    }

    /// Runs `fut` until it completes or the deadline passes.
    ///
    /// Returns `None` on timeout.
    pub async fn within<F: Future>(&self, fut: F) -> Option<F::Output> {
        timeout_at(self.deadline, fut).await.ok()
    }

    /// Like [`within`](Self::within) for fallible calls, mapping a timeout to
    /// [`AgentError::Timeout`] labelled with `operation`.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.within(fut)
            .await
            .unwrap_or_else(|| {
                Err(AgentError::Timeout {
                    operation: operation.to_string(),
                })
            })
    }
}
