//! Cooperative cancellation
//!
//! A [`CancelToken`] is cheap to clone; every clone observes the same flag.
//! Long-running fetches poll [`CancelToken::is_cancelled`] between requests
//! and race in-flight requests against [`CancelToken::cancelled`].

use std::sync::Arc;
use tokio::sync::watch;

/// Shared cancellation flag
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Cancel every clone of this token
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether `cancel` has been called
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the token is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // Sender lives as long as any token, so this never resolves
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
