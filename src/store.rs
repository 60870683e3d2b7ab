//! Lock-free policy store with atomic snapshot publishing

use crate::policy::PolicySet;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Holds the policy set currently in effect.
///
/// There is a single writer (the refresher) and any number of readers. Readers
/// take a snapshot with [`PolicyStore::current`] and keep using it for the whole
/// request, so a concurrent publish is never observed half-applied.
pub struct PolicyStore {
    policies: ArcSwap<PolicySet>,
    /// Number of publishes so far
    version: AtomicU64,
}

pub type SharedPolicyStore = Arc<PolicyStore>;

impl PolicyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            policies: ArcSwap::from_pointee(PolicySet::default()),
            version: AtomicU64::new(0),
        }
    }

    pub fn with_policies(policies: PolicySet) -> Self {
        Self {
            policies: ArcSwap::from_pointee(policies),
            version: AtomicU64::new(1),
        }
    }

    /// Snapshot of the current policy set
    #[inline]
    pub fn current(&self) -> Arc<PolicySet> {
        self.policies.load_full()
    }

    /// Replace the policy set in one atomic swap
    pub fn publish(&self, policies: PolicySet) {
        self.policies.store(Arc::new(policies));
        self.version.fetch_add(1, Ordering::Release);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.policies.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.load().is_empty()
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Policy;

    #[test]
    fn test_store_starts_empty() {
        let store = PolicyStore::new();
        assert!(store.is_empty());
        assert_eq!(store.version(), 0);
        assert!(store.current().is_empty());
    }

    #[test]
    fn test_publish_replaces_set() {
        let store = PolicyStore::new();
        store.publish(PolicySet::new(vec![Policy::new("^a$", &[]), Policy::new("^b$", &[])]));

        assert_eq!(store.len(), 2);
        assert_eq!(store.version(), 1);

        store.publish(PolicySet::new(vec![Policy::new("^c$", &[])]));
        assert_eq!(store.len(), 1);
        assert_eq!(store.version(), 2);
        assert_eq!(store.current().iter().next().unwrap().host_pattern, "^c$");
    }

    #[test]
    fn test_snapshot_survives_publish() {
        let store = PolicyStore::with_policies(PolicySet::new(vec![Policy::new("^old$", &[])]));
        let snapshot = store.current();

        store.publish(PolicySet::default());

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.iter().next().unwrap().host_pattern, "^old$");
        assert!(store.current().is_empty());
    }

    #[test]
    fn test_concurrent_readers_never_see_mixed_sets() {
        // Every published set is homogeneous: all patterns share one generation tag
        let store = Arc::new(PolicyStore::new());
        let make_set = |generation: usize| {
            (0..16)
                .map(|i| Policy::new(&format!("^gen{}-{}$", generation, i), &[]))
                .collect::<PolicySet>()
        };

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for generation in 0..200 {
                    store.publish(make_set(generation));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..2_000 {
                        let snapshot = store.current();
                        let tags: std::collections::HashSet<&str> = snapshot
                            .iter()
                            .map(|p| p.host_pattern.split('-').next().unwrap_or_default())
                            .collect();
                        assert!(tags.len() <= 1, "mixed policy generations: {:?}", tags);
                        assert!(snapshot.is_empty() || snapshot.len() == 16);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.version(), 200);
    }
}
