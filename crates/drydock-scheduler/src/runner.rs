//! Runner membership registry.
//!
//! The scheduler only consumes membership: is the fleet empty, is a
//! specific runner present, and does any runner accept untargeted work.
//! Connection handling and runner state live with the RPC layer.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::info;

/// A registered worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runner {
    pub id: String,
    /// When set, the runner only accepts jobs targeted at its id.
    pub by_id_only: bool,
}

impl Runner {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            by_id_only: false,
        }
    }

    pub fn by_id_only(mut self) -> Self {
        self.by_id_only = true;
        self
    }
}

/// Live runner membership, ordered by id.
#[derive(Debug, Default)]
pub struct RunnerRegistry {
    runners: RwLock<BTreeMap<String, Runner>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, runner: Runner) {
        info!(runner_id = %runner.id, by_id_only = runner.by_id_only, "runner registered");
        self.runners.write().insert(runner.id.clone(), runner);
    }

    pub fn deregister(&self, id: &str) -> bool {
        let removed = self.runners.write().remove(id).is_some();
        if removed {
            info!(runner_id = %id, "runner deregistered");
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Runner> {
        self.runners.read().get(id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.runners.read().len()
    }

    /// Whether any registered runner accepts untargeted jobs.
    pub fn any_accepts_untargeted(&self) -> bool {
        self.runners
            .read()
            .values()
            .any(|runner| !runner.by_id_only)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let registry = RunnerRegistry::new();
        assert!(registry.is_empty());

        registry.register(Runner::new("r1"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("r1").unwrap().id, "r1");
        assert!(registry.get("r2").is_none());

        assert!(registry.deregister("r1"));
        assert!(!registry.deregister("r1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn untargeted_capacity_ignores_pinned_runners() {
        let registry = RunnerRegistry::new();
        registry.register(Runner::new("pinned").by_id_only());
        assert!(!registry.any_accepts_untargeted());

        registry.register(Runner::new("open"));
        assert!(registry.any_accepts_untargeted());
    }
}
