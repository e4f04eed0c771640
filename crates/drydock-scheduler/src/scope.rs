//! Per-scope mutual exclusion.
//!
//! A scope is one (application, workspace) pair. At most one job per scope
//! may be active (waiting or running) at a time; further queued jobs in
//! the scope are "blocked" until the active one exits.

use std::collections::HashMap;

use crate::index::JobIndexEntry;
use crate::job::AppRef;
use crate::watch::{WatchSet, WatchTrigger};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ScopeKey {
    pub application: AppRef,
    pub workspace: String,
}

/// Tracks which scopes currently hold an active job. Mutated only while
/// the index write guard is held.
pub(crate) struct ScopeTracker {
    assigned: HashMap<ScopeKey, String>,
    changed: WatchTrigger,
}

impl ScopeTracker {
    pub(crate) fn new() -> Self {
        Self {
            assigned: HashMap::new(),
            changed: WatchTrigger::new(),
        }
    }

    /// Mark the entry's scope as held (or released) by this job.
    ///
    /// A release only clears the slot when the scope still maps to this
    /// job's id. Every release wakes blocked assignment waiters.
    pub(crate) fn set_assigned(&mut self, entry: &JobIndexEntry, assigned: bool) {
        let key = entry.scope_key();
        if assigned {
            self.assigned.insert(key, entry.id.clone());
        } else {
            if self.assigned.get(&key).map(String::as_str) == Some(entry.id.as_str()) {
                self.assigned.remove(&key);
            }
            self.changed.notify();
        }
    }

    /// True when the entry's scope is held by a different job. Subscribes
    /// the watch set (when given) to scope releases, so a blocked reader
    /// re-evaluates once the holder exits.
    pub(crate) fn is_blocked(&self, entry: &JobIndexEntry, ws: Option<&mut WatchSet>) -> bool {
        if let Some(ws) = ws {
            ws.add(self.changed.subscribe());
        }
        self.assigned
            .get(&entry.scope_key())
            .map(|holder| holder != &entry.id)
            .unwrap_or(false)
    }

}
