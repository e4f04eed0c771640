//! Change notification for index readers.
//!
//! Each index key group owns a `WatchTrigger`, a monotonically bumped
//! version channel. A read collects subscriptions into a `WatchSet`,
//! which can then be awaited as a single unit: it resolves when any
//! subscribed group changes after the subscription was taken, or when
//! the caller's cancellation token fires.

use futures::future::select_all;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SchedulerError};

/// Notifier for one index key group (or one record).
#[derive(Debug)]
pub(crate) struct WatchTrigger {
    tx: watch::Sender<u64>,
}

impl WatchTrigger {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    /// Wake every subscriber.
    pub(crate) fn notify(&self) {
        self.tx.send_modify(|version| *version = version.wrapping_add(1));
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}

/// Subscriptions accumulated over a read, waitable as a single unit.
#[derive(Debug, Default)]
pub struct WatchSet {
    receivers: Vec<watch::Receiver<u64>>,
}

impl WatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&mut self, receiver: watch::Receiver<u64>) {
        self.receivers.push(receiver);
    }

    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty()
    }

    /// Block until any subscribed group changes or `cancel` fires.
    ///
    /// An empty set can only be woken by cancellation. A dropped trigger
    /// counts as a change (the group it guarded is gone).
    pub async fn wait(mut self, cancel: &CancellationToken) -> Result<()> {
        if self.receivers.is_empty() {
            cancel.cancelled().await;
            return Err(SchedulerError::Canceled);
        }

        let any_changed = select_all(
            self.receivers
                .iter_mut()
                .map(|receiver| Box::pin(receiver.changed())),
        );

        tokio::select! {
            _ = cancel.cancelled() => Err(SchedulerError::Canceled),
            _ = any_changed => Ok(()),
        }
    }
}
