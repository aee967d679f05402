//! Call Context
//!
//! Carries the caller's cancellation token and deadline down the
//! vendor-call path.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-request cancellation and deadline
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    request_id: Option<String>,
}

impl CallContext {
    /// Context with no deadline that is never cancelled unless asked to
    pub fn new() -> Self {
        Self::default()
    }

    /// Context that expires after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            ..Self::default()
        }
    }

    /// Bind this context to an external cancellation token
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Cancel this context and every clone of it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Time left before the deadline, if one is set
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Run `fut` unless the context is cancelled or its deadline passes first
    pub async fn run<F, T>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled {
                operation: operation.to_string(),
            });
        }

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => Err(Error::Cancelled {
                        operation: operation.to_string(),
                    }),
                    result = tokio::time::timeout_at(deadline, fut) => match result {
                        Ok(inner) => inner,
                        Err(_) => Err(Error::Timeout {
                            operation: operation.to_string(),
                        }),
                    },
                }
            }
            None => {
                tokio::select! {
                    _ = self.token.cancelled() => Err(Error::Cancelled {
                        operation: operation.to_string(),
                    }),
                    result = fut => result,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = CallContext::new();
        let value = ctx.run("noop", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_cancelled() {
        let ctx = CallContext::new();
        ctx.cancel();

        let result: Result<()> = ctx.run("get_volume", async { Ok(()) }).await;
        assert_matches!(result, Err(Error::Cancelled { operation }) if operation == "get_volume");
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let ctx = CallContext::with_timeout(Duration::from_millis(50));

        let result: Result<()> = ctx
            .run("list_volumes", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert_matches!(result, Err(Error::Timeout { .. }));
    }

    #[test]
    fn test_request_id() {
        let ctx = CallContext::new().with_request_id("req-1");
        assert_eq!(ctx.request_id(), Some("req-1"));
        assert!(ctx.remaining().is_none());
    }
}
