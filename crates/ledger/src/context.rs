use crate::LedgerError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-request governance for ledger calls: a cancellation token shared with
/// the gateway request plus an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// No deadline, never canceled unless `cancel()` is called.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().timeout(timeout)
    }

    /// Tighten the deadline; an earlier existing deadline wins.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Context canceled together with this one but cancelable on its own.
    pub fn child(&self) -> Self {
        Self { cancel: self.cancel.child_token(), deadline: self.deadline }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drive a ledger future under this context.
    /// Cancellation and deadline expiry both surface as `LedgerError::Canceled`.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(LedgerError::Canceled("context canceled before call".into()));
        }
        if self.deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(LedgerError::Canceled("deadline exceeded before call".into()));
        }

        let guarded = async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(LedgerError::Canceled("context canceled".into())),
                res = fut => res,
            }
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                .await
                .unwrap_or_else(|_| Err(LedgerError::Canceled("deadline exceeded".into()))),
            None => guarded.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_when_not_canceled() {
        let ctx = CallContext::with_timeout(Duration::from_secs(5));
        let out = ctx.run(async { Ok::<_, LedgerError>(7) }).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn already_canceled_context_short_circuits() {
        let ctx = CallContext::background();
        ctx.cancel();
        let err = ctx
            .run(async { Ok::<_, LedgerError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Canceled(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_is_canceled() {
        let ctx = CallContext::with_timeout(Duration::from_millis(50));
        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, LedgerError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Canceled(ref m) if m.contains("deadline")));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_refuses_even_ready_calls() {
        let ctx = CallContext::with_timeout(Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(60)).await;
        let err = ctx.run(async { Ok::<_, LedgerError>(()) }).await.unwrap_err();
        assert!(matches!(err, LedgerError::Canceled(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn canceling_parent_cancels_child_call() {
        let parent = CallContext::background();
        let child = parent.child();
        let handle = tokio::spawn(async move {
            child
                .run(async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<_, LedgerError>(())
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        parent.cancel();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, LedgerError::Canceled(_)));
    }

    #[test]
    fn earlier_deadline_wins() {
        let ctx = CallContext::with_timeout(Duration::from_millis(10)).timeout(Duration::from_secs(60));
        let deadline = ctx.deadline().unwrap();
        assert!(deadline <= Instant::now() + Duration::from_millis(10));
    }
}
