//! Cancellation and request-scoped call context

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// Cloneable one-shot cancellation flag
///
/// All clones observe the same flag. Cancelling wakes every pending
/// [`CancelSignal::cancelled`] future.
#[derive(Clone, Default)]
pub struct CancelSignal {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl std::fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelSignal {
    /// Fresh, uncancelled signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel. Repeated calls are no-ops.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            debug!("Cancellation requested");
            self.notify.notify_waiters();
        }
    }

    /// Whether any clone has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelSignal::cancel`] has been called
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a concurrent cancel is not missed.
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Request-scoped values carried through every framework call
///
/// Identifies the calling tool (used as `created_by_tool` in the context
/// store), the session, and the parent cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub tool: Option<String>,
    pub session_id: Option<String>,
    pub cancel: CancelSignal,
}

impl CallContext {
    /// Anonymous context with its own cancellation signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Calling tool, recorded as `created_by_tool`
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Share a parent's cancellation signal
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Calling tool name, or `"unknown"`
    pub fn tool_or_unknown(&self) -> &str {
        self.tool.as_deref().unwrap_or("unknown")
    }

    /// Whether the parent signal has fired
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let signal = CancelSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_cancelled());

        signal.cancel();
        assert!(clone.is_cancelled());

        // second cancel is harmless
        signal.cancel();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_when_already_cancelled() {
        let signal = CancelSignal::new();
        signal.cancel();
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .expect("already-cancelled signal should resolve immediately");
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let signal = CancelSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };

        tokio::task::yield_now().await;
        signal.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[test]
    fn test_call_context_tool_fallback() {
        assert_eq!(CallContext::new().tool_or_unknown(), "unknown");
        assert_eq!(
            CallContext::new().with_tool("build_image").tool_or_unknown(),
            "build_image"
        );
    }
}
