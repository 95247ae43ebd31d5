//! Cancellation and deadline context for inference calls
//!
//! A context is observed cooperatively: synchronous calls check it before and
//! after the native call, and [`InferRequest::run_async`] races it against
//! completion, cancelling the native run when it fires first.
//!
//! [`InferRequest::run_async`]: crate::InferRequest::run_async

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use crate::error::{Error, Result};

struct Inner {
    deadline: Option<Instant>,
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shared cancellation token with an optional deadline. Clones observe the
/// same cancellation.
#[derive(Clone)]
pub struct InferContext {
    inner: Arc<Inner>,
}

impl InferContext {
    fn with(deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                deadline,
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Context that never expires and is only cancelled explicitly.
    pub fn background() -> Self {
        Self::with(None)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with(Some(Instant::now() + timeout))
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self::with(Some(deadline))
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline; `None` without one.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// `Err` once the context is cancelled or past its deadline.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Resolves when the context is cancelled or expires, yielding the error
    /// a call observing it should return.
    pub async fn done(&self) -> Error {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Err(e) = self.check() {
            return e;
        }
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = &mut notified => Error::Cancelled,
                    _ = tokio::time::sleep_until(deadline.into()) => Error::DeadlineExceeded,
                }
            }
            None => {
                notified.await;
                Error::Cancelled
            }
        }
    }
}

impl Default for InferContext {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for InferContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferContext")
            .field("deadline", &self.inner.deadline)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_never_fires() {
        let ctx = InferContext::background();
        assert!(ctx.check().is_ok());
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());
    }

    #[test]
    fn test_cancel_is_shared_by_clones() {
        let ctx = InferContext::with_timeout(Duration::from_secs(60));
        let clone = ctx.clone();
        clone.cancel();
        assert!(ctx.is_cancelled());
        assert!(matches!(ctx.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_expired_deadline() {
        let ctx = InferContext::with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(matches!(ctx.check(), Err(Error::DeadlineExceeded)));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_done_on_deadline() {
        let ctx = InferContext::with_timeout(Duration::from_millis(20));
        let started = Instant::now();
        assert!(matches!(ctx.done().await, Error::DeadlineExceeded));
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[tokio::test]
    async fn test_done_on_cancel() {
        let ctx = InferContext::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let reason = tokio::time::timeout(Duration::from_secs(5), ctx.done())
            .await
            .unwrap();
        assert!(matches!(reason, Error::Cancelled));
    }
}
