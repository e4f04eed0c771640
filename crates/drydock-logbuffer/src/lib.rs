//! drydock-logbuffer: terminal output buffering for running jobs
//!
//! A `Buffer` holds the most recent output of a single job. It is
//! append-only and bounded: once the retention window is full the oldest
//! entries are evicted. Any number of readers may attach at any time; a
//! late reader first replays the retained window and then streams live
//! entries as they are appended.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Entries retained per buffer before the oldest are evicted.
pub const DEFAULT_CAPACITY: usize = 1024;

/// A single line of terminal output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub ts: DateTime<Utc>,
    pub stream: String,
    pub line: String,
}

struct Inner {
    entries: Mutex<VecDeque<Entry>>,
    tx: broadcast::Sender<Entry>,
    capacity: usize,
}

/// Shared handle to a job's output buffer. Cloning is cheap; all clones
/// observe the same window.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<Inner>,
}

impl Buffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(VecDeque::new()),
                tx,
                capacity: capacity.max(1),
            }),
        }
    }

    /// Append one line of output, evicting the oldest entry if the window
    /// is full. Live readers receive the entry immediately.
    pub fn append(&self, stream: &str, line: &str) -> Entry {
        let entry = Entry {
            ts: Utc::now(),
            stream: stream.to_string(),
            line: line.to_string(),
        };

        let mut entries = self.inner.entries.lock();
        entries.push_back(entry.clone());
        while entries.len() > self.inner.capacity {
            entries.pop_front();
        }
        // Sent under the lock so readers attaching concurrently see each
        // entry exactly once (either in the replay window or live).
        let _ = self.inner.tx.send(entry.clone());

        entry
    }

    /// Copy of the currently retained window, oldest first.
    pub fn snapshot(&self) -> Vec<Entry> {
        self.inner.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    /// Attach a reader. The reader replays the retained window before
    /// yielding live entries.
    pub fn reader(&self) -> BufferReader {
        let entries = self.inner.entries.lock();
        let rx = self.inner.tx.subscribe();
        BufferReader {
            replay: entries.iter().cloned().collect(),
            rx,
        }
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

/// A reader attached to a `Buffer`.
pub struct BufferReader {
    replay: VecDeque<Entry>,
    rx: broadcast::Receiver<Entry>,
}

impl BufferReader {
    /// Next entry: replayed history first, then live output. Returns
    /// `None` once the buffer has been dropped and all output consumed.
    /// A reader that falls too far behind skips evicted entries.
    pub async fn next(&mut self) -> Option<Entry> {
        if let Some(entry) = self.replay.pop_front() {
            return Some(entry);
        }
        loop {
            match self.rx.recv().await {
                Ok(entry) => return Some(entry),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn late_reader_replays_window() {
        let buffer = Buffer::new();
        buffer.append("stdout", "one");
        buffer.append("stderr", "two");

        let mut reader = buffer.reader();
        assert_eq!(reader.next().await.unwrap().line, "one");
        let second = reader.next().await.unwrap();
        assert_eq!(second.line, "two");
        assert_eq!(second.stream, "stderr");
    }

    #[tokio::test]
    async fn reader_streams_live_entries() {
        let buffer = Buffer::new();
        let mut reader = buffer.reader();

        buffer.append("stdout", "hello");
        assert_eq!(reader.next().await.unwrap().line, "hello");
    }

    #[tokio::test]
    async fn window_is_bounded() {
        let buffer = Buffer::with_capacity(2);
        buffer.append("stdout", "a");
        buffer.append("stdout", "b");
        buffer.append("stdout", "c");

        let lines: Vec<_> = buffer.snapshot().into_iter().map(|e| e.line).collect();
        assert_eq!(lines, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn reader_ends_when_buffer_dropped() {
        let buffer = Buffer::new();
        buffer.append("stdout", "only");
        let mut reader = buffer.reader();
        drop(buffer);

        assert_eq!(reader.next().await.unwrap().line, "only");
        assert!(reader.next().await.is_none());
    }
}
