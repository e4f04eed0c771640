//! One-shot state timers.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A one-shot timer driving a time-based state transition.
///
/// The timer aborts when dropped, so replacing the timer slot on an index
/// entry implicitly stops the previous timer.
#[derive(Debug)]
pub(crate) struct StateTimer {
    handle: JoinHandle<()>,
}

impl StateTimer {
    /// Run `action` after `delay` unless stopped or dropped first.
    pub(crate) fn spawn<F>(delay: Duration, action: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });
        Self { handle }
    }

    pub(crate) fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for StateTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let _timer = StateTimer::spawn(Duration::from_secs(5), async move {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_stops_the_timer() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let timer = StateTimer::spawn(Duration::from_secs(5), async move {
            flag.store(true, Ordering::SeqCst);
        });
        drop(timer);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_firing() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let timer = StateTimer::spawn(Duration::from_secs(5), async move {
            flag.store(true, Ordering::SeqCst);
        });
        timer.stop();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
