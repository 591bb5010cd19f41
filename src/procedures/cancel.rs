//! Cooperative cancellation for running procedures.
//!
//! A [`CancellationToken`] is a cloneable handle on a shared flag. The operator
//! side (Ctrl-C handler, a test) calls [`cancel`](CancellationToken::cancel); the
//! procedure polls [`is_cancelled`](CancellationToken::is_cancelled) at its
//! iteration boundaries. Nothing is interrupted mid-operation.
//!
//! # Example
//!
//! ```rust,ignore
//! let token = CancellationToken::new();
//! let handle = token.clone();
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     handle.cancel_with_reason("Ctrl-C");
//! });
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared stop request.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    reason: Arc<std::sync::RwLock<Option<String>>>,
}

impl CancellationToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Request a stop, remembering why.
    pub fn cancel_with_reason(&self, reason: impl Into<String>) {
        let reason = reason.into();
        info!(%reason, "cancellation requested");
        if let Ok(mut r) = self.reason.write() {
            *r = Some(reason);
        }
        self.cancel();
    }

    /// Whether a stop has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Reason given to [`cancel_with_reason`](Self::cancel_with_reason), if any.
    pub fn reason(&self) -> Option<String> {
        self.reason.read().ok().and_then(|r| r.clone())
    }

    /// Clear the request so the token can be reused.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
        if let Ok(mut r) = self.reason.write() {
            *r = None;
        }
    }
}
