//! Caller-side cancellation and deadline carrier.

use std::time::Duration;

use sheaf_core::CancelReason;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Stand-in for "never" when a deadline does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Returns `start + timeout`, saturating to a far-future instant on overflow.
pub(crate) fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

/// Cancellation signal and optional deadline for one call.
///
/// Ends when its token is cancelled or its deadline passes, whichever comes
/// first. Only ever affects the caller's own wait.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that never ends.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that ends `timeout` from now.
    #[must_use]
    pub fn timeout(timeout: Duration) -> Self {
        Self::background().with_timeout(timeout)
    }

    /// Adds a deadline `timeout` from now. The earlier deadline wins.
    ///
    /// A timeout too large to represent adds no deadline.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Adds an absolute deadline. The earlier deadline wins.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    /// Attaches a cancellation token, replacing any previous one.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns why the context has ended, or `None` while it is live.
    #[must_use]
    pub fn err(&self) -> Option<CancelReason> {
        if self.token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Some(CancelReason::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(CancelReason::DeadlineExceeded);
        }
        None
    }

    /// Resolves when the context ends. Pending forever for `background()`.
    pub async fn done(&self) -> CancelReason {
        let cancelled = async {
            match &self.token {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = cancelled => CancelReason::Cancelled,
            () = expired => CancelReason::DeadlineExceeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_never_ends() {
        let ctx = CallContext::background();
        assert_eq!(ctx.err(), None);
        let waited = tokio::time::timeout(Duration::from_millis(10), ctx.done()).await;
        assert!(waited.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let ctx = CallContext::timeout(Duration::from_millis(50));
        assert_eq!(ctx.err(), None);
        assert_eq!(ctx.done().await, CancelReason::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(CancelReason::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_token_cancels() {
        let token = CancellationToken::new();
        let ctx = CallContext::background().with_cancellation(token.clone());

        let waiter = tokio::spawn(async move { ctx.done().await });
        token.cancel();
        assert_eq!(waiter.await.unwrap(), CancelReason::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_earlier_deadline_wins() {
        let start = Instant::now();
        let ctx = CallContext::timeout(Duration::from_millis(10))
            .with_timeout(Duration::from_secs(60));
        assert_eq!(ctx.deadline(), Some(start + Duration::from_millis(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_timeout_adds_no_deadline() {
        let ctx = CallContext::timeout(Duration::MAX);
        assert_eq!(ctx.deadline(), None);
        assert_eq!(ctx.err(), None);

        let start = Instant::now();
        let ctx = CallContext::timeout(Duration::from_millis(5)).with_timeout(Duration::MAX);
        assert_eq!(ctx.deadline(), Some(start + Duration::from_millis(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_after_saturates() {
        let start = Instant::now();
        assert_eq!(
            deadline_after(start, Duration::from_millis(3)),
            start + Duration::from_millis(3)
        );
        assert_eq!(deadline_after(start, Duration::MAX), start + FAR_FUTURE);
    }

    #[tokio::test]
    async fn test_cancelled_token_reported_first() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = CallContext::timeout(Duration::ZERO).with_cancellation(token);
        assert_eq!(ctx.err(), Some(CancelReason::Cancelled));
    }
}
