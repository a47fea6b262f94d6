//! Cancellation and deadline context
//!
//! Every network-bound call runs under a [`Context`]. Dropping the wrapped
//! future is how the call is aborted, so nothing after the await point
//! (in particular a cache export) runs once the context fires.

use std::future::{pending, Future};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a call under a [`Context`] did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interruption {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation signal plus optional deadline
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Fires the cancellation signal of every context derived from it
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// A cancellable context and the handle that cancels it
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            cancel: Some(rx),
            deadline: None,
        };
        (ctx, CancelHandle(tx))
    }

    /// Same context with a deadline `timeout` from now (the earlier one wins)
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Check the context without awaiting anything
    pub fn check(&self) -> Result<(), Interruption> {
        if self.is_cancelled() {
            return Err(Interruption::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Interruption::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Drive `fut` to completion unless the context fires first
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interruption> {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            out = fut => Ok(out),
            _ = self.cancelled() => Err(Interruption::Cancelled),
            _ = deadline => Err(Interruption::DeadlineExceeded),
        }
    }

    /// Sleep for `duration` under this context
    pub async fn sleep(&self, duration: Duration) -> Result<(), Interruption> {
        self.run(tokio::time::sleep(duration)).await
    }

    async fn cancelled(&self) {
        let Some(rx) = self.cancel.as_ref() else {
            return pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            // Sender gone: nobody can cancel any more
            if rx.changed().await.is_err() {
                return pending().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_runs_to_completion() {
        let ctx = Context::background();
        let out = ctx.run(async { 42 }).await;
        assert_eq!(out, Ok(42));
    }

    #[tokio::test]
    async fn test_cancel_aborts_pending_call() {
        let (ctx, handle) = Context::with_cancel();

        let task = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.run(pending::<()>()).await })
        };

        tokio::task::yield_now().await;
        handle.cancel();

        let out = task.await.unwrap();
        assert_eq!(out, Err(Interruption::Cancelled));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_already_cancelled_never_polls_future() {
        let (ctx, handle) = Context::with_cancel();
        handle.cancel();

        let mut polled = false;
        let out = ctx.run(async { polled = true }).await;

        assert_eq!(out, Err(Interruption::Cancelled));
        assert!(!polled);
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        let out = ctx.run(pending::<()>()).await;
        assert_eq!(out, Err(Interruption::DeadlineExceeded));
        assert_eq!(ctx.check(), Err(Interruption::DeadlineExceeded));
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = Context::background()
            .with_deadline(now + Duration::from_secs(5))
            .with_deadline(now + Duration::from_secs(60));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn test_dropped_handle_does_not_cancel() {
        let (ctx, handle) = Context::with_cancel();
        drop(handle);
        assert!(!ctx.is_cancelled());
        assert_eq!(ctx.check(), Ok(()));
    }
}
