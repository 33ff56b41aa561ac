//! Process-wide cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// What an interrupt did to the run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// First interrupt: the status switched to stopping.
    Stopping,
    /// The status was already stopping; the caller should give up waiting.
    Escalate,
}

#[derive(Debug, Default)]
struct Inner {
    stopping: AtomicBool,
    token: CancellationToken,
}

/// Shared "keep running" flag.
///
/// Plugins check [`is_running`](Self::is_running) between units of work, or
/// race their work against [`cancelled`](Self::cancelled). Stopping is
/// cooperative: nothing is forcibly interrupted. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct RunStatus {
    inner: Arc<Inner>,
}

impl RunStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        !self.inner.stopping.load(Ordering::Acquire)
    }

    /// Ask everything to stop.
    pub fn stop(&self) {
        self.inner.stopping.store(true, Ordering::Release);
        self.inner.token.cancel();
    }

    /// Record an interrupt: the first one stops, any later one escalates.
    pub fn interrupt(&self) -> Interrupt {
        if self.inner.stopping.swap(true, Ordering::AcqRel) {
            return Interrupt::Escalate;
        }
        self.inner.token.cancel();
        Interrupt::Stopping
    }

    /// Resolves once a stop has been requested.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await;
    }

    /// Token cancelled together with this status, for APIs that take one.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_interrupt_stops_then_escalates() {
        let status = RunStatus::new();
        assert!(status.is_running());
        assert_eq!(status.interrupt(), Interrupt::Stopping);
        assert!(!status.is_running());
        assert_eq!(status.interrupt(), Interrupt::Escalate);
        assert_eq!(status.interrupt(), Interrupt::Escalate);
    }

    #[test]
    fn test_interrupt_after_stop_escalates() {
        let status = RunStatus::new();
        status.stop();
        assert_eq!(status.interrupt(), Interrupt::Escalate);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let status = RunStatus::new();
        let observer = status.clone();
        let waiter = tokio::spawn(async move { observer.cancelled().await });
        status.stop();
        tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
        assert!(status.token().is_cancelled());
    }
}
