//! Hierarchical cancellation for leader routines.
//!
//! A [`CancellationSource`] owns a `watch` channel; its tokens resolve once
//! the source (or any ancestor source) is cancelled or dropped. A leader term
//! owns the root source and every routine runs under a child of it, so
//! revoking leadership cancels everything at once while a single routine can
//! still be stopped on its own.

use futures::future::{pending, select_all, FutureExt};
use std::time::Duration;
use tokio::sync::watch;

/// Owner side of a cancellation scope.
#[derive(Debug)]
pub struct CancellationSource {
    tx: watch::Sender<bool>,
    token: CancellationToken,
}

impl CancellationSource {
    /// Root scope
    pub fn new() -> Self {
        Self::with_parents(Vec::new())
    }

    fn with_parents(mut receivers: Vec<watch::Receiver<bool>>) -> Self {
        let (tx, rx) = watch::channel(false);
        receivers.push(rx);
        Self {
            tx,
            token: CancellationToken { receivers },
        }
    }

    /// Token observing this scope and every ancestor
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Nested scope cancelled together with this one
    pub fn child(&self) -> CancellationSource {
        self.token.child()
    }

    /// Cancel this scope and every nested scope
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether this scope (or an ancestor) was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation scope.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    receivers: Vec<watch::Receiver<bool>>,
}

impl CancellationToken {
    /// Token that is never cancelled
    pub fn never() -> Self {
        Self {
            receivers: Vec::new(),
        }
    }

    /// Nested scope cancelled together with this token
    pub fn child(&self) -> CancellationSource {
        CancellationSource::with_parents(self.receivers.clone())
    }

    /// Non-blocking cancellation check
    pub fn is_cancelled(&self) -> bool {
        self.receivers
            .iter()
            .any(|rx| *rx.borrow() || rx.has_changed().is_err())
    }

    /// Resolves when cancellation is requested
    pub async fn cancelled(&self) {
        if self.receivers.is_empty() {
            return pending::<()>().await;
        }
        let waits = self
            .receivers
            .iter()
            .cloned()
            .map(|rx| wait_cancelled(rx).boxed());
        select_all(waits).await;
    }

    /// Sleep for `duration`; returns `false` if cancelled first
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

async fn wait_cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        // a dropped source counts as cancelled
        if rx.changed().await.is_err() {
            return;
        }
    }
}
