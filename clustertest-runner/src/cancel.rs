// Copyright (c) The clustertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cancellation scopes.
//!
//! A [`CancelToken`] is shared by every unit that should stop when a test fails fatally. Tokens
//! form a tree: cancelling a token cancels all of its children, but not its parent.

use crate::errors::Cancelled;
use std::{
    future::Future,
    sync::{Arc, Mutex, Weak},
};
use tokio::sync::watch;

/// A cloneable handle to a cancellation scope.
///
/// Cancelling is idempotent: the first call transitions the scope, and later calls are no-ops.
#[derive(Clone, Debug)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug)]
struct CancelInner {
    tx: watch::Sender<bool>,
    children: Mutex<Vec<Weak<CancelInner>>>,
}

impl CancelInner {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx,
            children: Mutex::new(Vec::new()),
        }
    }

    fn cancel(&self) -> bool {
        if self.tx.send_replace(true) {
            return false;
        }

        // The flag is set before the children lock is taken, so a concurrent `child()` either sees
        // the flag or registers itself in time to be drained here.
        let children = {
            let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *children)
        };
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
        true
    }

    fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Creates a new, root cancellation scope.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner::new()),
        }
    }

    /// Creates a child scope that is cancelled whenever `self` is.
    pub fn child(&self) -> Self {
        let child = Arc::new(CancelInner::new());
        {
            let mut children = self
                .inner
                .children
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if self.inner.is_cancelled() {
                drop(children);
                child.cancel();
            } else {
                children.retain(|c| c.strong_count() > 0);
                children.push(Arc::downgrade(&child));
            }
        }
        Self { inner: child }
    }

    /// Cancels this scope and all of its children.
    ///
    /// Returns true if this call performed the transition, false if the scope was already
    /// cancelled.
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    /// Returns true if this scope has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Waits until this scope is cancelled.
    ///
    /// Returns immediately if the scope is already cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.tx.subscribe();
        // The sender lives as long as `self`, so this can't observe a closed channel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Runs `fut` to completion unless this scope is cancelled first.
    pub async fn run_until_cancelled<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        tokio::select! {
            biased;
            () = self.cancelled() => Err(Cancelled),
            output = fut => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cancel_is_idempotent() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.cancel(), "first cancel performs the transition");
        assert!(!token.cancel(), "second cancel is a no-op");
        assert!(token.is_cancelled());
    }

    #[test]
    fn parent_cancels_children_but_not_vice_versa() {
        let parent = CancelToken::new();
        let child = parent.child();
        let grandchild = child.child();

        child.cancel();
        assert!(!parent.is_cancelled());
        assert!(grandchild.is_cancelled());

        let sibling = parent.child();
        parent.cancel();
        assert!(sibling.is_cancelled());
    }

    #[test]
    fn child_of_cancelled_scope_starts_cancelled() {
        let parent = CancelToken::new();
        parent.cancel();
        assert!(parent.child().is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.child();
            tokio::spawn(async move { token.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter woke up")
            .expect("waiter did not panic");
    }

    #[tokio::test]
    async fn run_until_cancelled() {
        let token = CancelToken::new();
        assert_eq!(token.run_until_cancelled(async { 7 }).await, Ok(7));

        token.cancel();
        let never = std::future::pending::<()>();
        assert_eq!(token.run_until_cancelled(never).await, Err(Cancelled));
    }
}
