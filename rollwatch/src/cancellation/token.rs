//! Hierarchical cancellation token.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

/// A token for cooperative cancellation.
///
/// Cancellation is idempotent (the first reason wins) and flows downward:
/// cancelling a token cancels every child derived from it, but never the
/// parent. Tasks poll [`CancelToken::is_cancelled`] on each loop iteration
/// and await [`CancelToken::cancelled`] at suspension points.
#[derive(Default)]
pub struct CancelToken {
    /// Whether cancellation has been requested.
    cancelled: AtomicBool,
    /// The reason for cancellation (first one wins).
    reason: RwLock<Option<String>>,
    /// Wakes tasks parked in `cancelled()`.
    notify: Notify,
    /// Children to propagate cancellation to.
    children: RwLock<Vec<Weak<CancelToken>>>,
}

impl CancelToken {
    /// Creates a new root token.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Derives a child token.
    ///
    /// The child is cancelled whenever this token is; a child born under an
    /// already-cancelled parent starts out cancelled.
    #[must_use]
    pub fn child(self: &Arc<Self>) -> Arc<Self> {
        let child = Self::new();
        if self.is_cancelled() {
            child.cancel(self.reason().unwrap_or_else(|| "parent cancelled".into()));
        } else {
            self.children.write().push(Arc::downgrade(&child));
        }
        child
    }

    /// Requests cancellation with a reason.
    ///
    /// Idempotent; only the first reason is kept. Propagates to all live
    /// children before waking local waiters.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let reason = reason.into();
            *self.reason.write() = Some(reason.clone());

            let children = std::mem::take(&mut *self.children.write());
            for child in children {
                if let Some(child) = child.upgrade() {
                    child.cancel(reason.clone());
                }
            }

            self.notify.notify_waiters();
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_token_default_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_token_cancel_idempotent() {
        let token = CancelToken::new();
        token.cancel("first");
        token.cancel("second");
        assert_eq!(token.reason(), Some("first".to_string()));
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let root = CancelToken::new();
        let child = root.child();
        let grandchild = child.child();

        root.cancel("shutdown");

        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
        assert_eq!(grandchild.reason(), Some("shutdown".to_string()));
    }

    #[test]
    fn test_child_does_not_cancel_parent() {
        let root = CancelToken::new();
        let child = root.child();

        child.cancel("local stop");

        assert!(!root.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_of_cancelled_parent_is_born_cancelled() {
        let root = CancelToken::new();
        root.cancel("done");

        let child = root.child();
        assert!(child.is_cancelled());
        assert_eq!(child.reason(), Some("done".to_string()));
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = token.clone();

        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel("wake up");

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_resolves_immediately_if_already_cancelled() {
        let token = CancelToken::new();
        token.cancel("gone");
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .unwrap();
    }
}
