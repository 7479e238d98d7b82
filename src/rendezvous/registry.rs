//! Per-group barrier registry
//!
//! Barrier sizes are derived from the start/end barrier slots the group's
//! tests declare. Each barrier also remembers which tests are expected to
//! enter it, so that a test that finishes or never starts can abandon the
//! barriers its peers would otherwise wait on forever.

use super::{Barrier, BarrierOutcome, BarrierStatus, DONE_BARRIER, READY_BARRIER};
use crate::config::TestSpec;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Barriers of one dispatch session
#[derive(Debug)]
pub struct RendezvousRegistry {
    group_size: usize,
    state: Mutex<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    barriers: HashMap<String, Arc<Barrier>>,
    barriers_of_tests: HashMap<String, Vec<String>>,
}

impl RendezvousRegistry {
    /// Create an empty registry for a group of `group_size` tests
    pub fn new(group_size: usize) -> Self {
        Self {
            group_size,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Count how many tests declare each barrier name
    ///
    /// A test naming the same barrier in both slots counts once. The reserved
    /// ready/done checkpoints always require the whole group.
    pub fn derive_barriers(tests: &[TestSpec]) -> BTreeMap<String, usize> {
        let mut sizes: BTreeMap<String, usize> = BTreeMap::new();
        for test in tests {
            for name in distinct_barriers(test) {
                *sizes.entry(name.to_string()).or_insert(0) += 1;
            }
        }

        sizes.insert(READY_BARRIER.to_string(), tests.len());
        sizes.insert(DONE_BARRIER.to_string(), tests.len());
        sizes
    }

    /// Create every barrier the group needs and register expected entrants
    ///
    /// Declaring tests are registered against their named barriers; every test
    /// is registered against the reserved checkpoints. Returns the derived sizes.
    pub fn provision(&self, tests: &[TestSpec]) -> BTreeMap<String, usize> {
        let sizes = Self::derive_barriers(tests);

        for test in tests {
            for name in distinct_barriers(test) {
                self.init_barrier(&test.name, name, sizes[name]);
            }
            self.init_barrier(&test.name, READY_BARRIER, self.group_size);
            self.init_barrier(&test.name, DONE_BARRIER, self.group_size);
        }

        // Reserved checkpoints exist even when the group declares nothing
        let mut state = self.lock();
        for (name, required) in &sizes {
            state
                .barriers
                .entry(name.clone())
                .or_insert_with(|| Arc::new(Barrier::new(name.clone(), *required)));
        }

        sizes
    }

    /// Create `barrier` if absent and record that `test_name` will enter it
    ///
    /// The first caller's `required` wins; later calls only add the association.
    pub fn init_barrier(&self, test_name: &str, barrier: &str, required: usize) {
        let mut state = self.lock();

        state
            .barriers
            .entry(barrier.to_string())
            .or_insert_with(|| {
                debug!(barrier, required, "Created barrier");
                Arc::new(Barrier::new(barrier, required))
            });

        let list = state.barriers_of_tests.entry(test_name.to_string()).or_default();
        if !list.iter().any(|b| b == barrier) {
            debug!(barrier, test = test_name, "Associated barrier with test");
            list.push(barrier.to_string());
        }
    }

    /// [`RendezvousRegistry::init_barrier`] sized for the whole group
    pub fn init_barrier_default(&self, test_name: &str, barrier: &str) {
        self.init_barrier(test_name, barrier, self.group_size);
    }

    /// Enter `barrier`, waiting for its cohort
    pub async fn enter_barrier(&self, barrier: &str) -> BarrierOutcome {
        let handle = self.barrier_or_default(barrier);
        debug!(barrier, "Entering barrier");
        let outcome = handle.enter().await;
        debug!(barrier, ?outcome, "Left barrier");
        outcome
    }

    /// Blocking variant of [`RendezvousRegistry::enter_barrier`]
    #[cfg(test)]
    pub fn enter_barrier_blocking(&self, barrier: &str) -> BarrierOutcome {
        self.barrier_or_default(barrier).enter_blocking()
    }

    /// Abandon one barrier; returns false if it does not exist
    pub fn abandon(&self, barrier: &str) -> bool {
        let handle = self.lock().barriers.get(barrier).cloned();
        match handle {
            Some(handle) => {
                let woken = handle.abandon();
                debug!(barrier, woken, "Abandoned barrier");
                true
            }
            None => false,
        }
    }

    /// Abandon every barrier `test_name` was expected to enter
    pub fn abandon_barriers_of(&self, test_name: &str) -> Vec<String> {
        let handles: Vec<Arc<Barrier>> = {
            let state = self.lock();
            match state.barriers_of_tests.get(test_name) {
                Some(names) => names
                    .iter()
                    .filter_map(|name| state.barriers.get(name).cloned())
                    .collect(),
                None => return Vec::new(),
            }
        };

        handles
            .iter()
            .map(|handle| {
                let woken = handle.abandon();
                debug!(
                    barrier = handle.name(),
                    test = test_name,
                    woken,
                    "Abandoned barrier of test"
                );
                handle.name().to_string()
            })
            .collect()
    }

    /// Abandon every barrier in the registry
    pub fn abandon_all(&self) -> usize {
        let handles: Vec<Arc<Barrier>> = self.lock().barriers.values().cloned().collect();
        handles.iter().map(|handle| handle.abandon()).sum()
    }

    pub fn barrier(&self, name: &str) -> Option<Arc<Barrier>> {
        self.lock().barriers.get(name).cloned()
    }

    /// Status and release count of every barrier, sorted by name
    pub fn snapshot(&self) -> Vec<(String, BarrierStatus, u64)> {
        let handles: Vec<Arc<Barrier>> = self.lock().barriers.values().cloned().collect();
        let mut states: Vec<_> = handles
            .iter()
            .map(|handle| (handle.name().to_string(), handle.status(), handle.releases()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Barrier names registered for `test_name`, in registration order
    pub fn barriers_of(&self, test_name: &str) -> Vec<String> {
        self.lock()
            .barriers_of_tests
            .get(test_name)
            .cloned()
            .unwrap_or_default()
    }

    fn barrier_or_default(&self, barrier: &str) -> Arc<Barrier> {
        let mut state = self.lock();
        let group_size = self.group_size;
        state
            .barriers
            .entry(barrier.to_string())
            .or_insert_with(|| {
                warn!(
                    barrier,
                    required = group_size,
                    "Entering undeclared barrier, sized for whole group"
                );
                Arc::new(Barrier::new(barrier, group_size))
            })
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn distinct_barriers(test: &TestSpec) -> BTreeSet<&str> {
    test.declared_barriers().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_spec;
    use std::thread;
    use std::time::Duration;

    fn spec(name: &str, start: &str, end: &str) -> TestSpec {
        let mut spec = test_spec(name, "_AGENT1");
        spec.start_barrier = start.to_string();
        spec.end_barrier = end.to_string();
        spec
    }

    fn wait_for_parked(registry: &RendezvousRegistry, barrier: &str, count: usize) {
        for _ in 0..200 {
            if registry.barrier(barrier).map(|b| b.waiting()) == Some(count) {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("barrier {} never reached {} parked entrants", barrier, count);
    }

    #[test]
    fn test_derive_counts_declarers() {
        let tests = vec![
            spec("a", "loaded", "flushed"),
            spec("b", "loaded", ""),
            spec("c", "", "flushed"),
            spec("d", "loaded", ""),
        ];

        let sizes = RendezvousRegistry::derive_barriers(&tests);
        assert_eq!(sizes["loaded"], 3);
        assert_eq!(sizes["flushed"], 2);
        assert_eq!(sizes[READY_BARRIER], 4);
        assert_eq!(sizes[DONE_BARRIER], 4);
        assert_eq!(sizes.len(), 4);
    }

    #[test]
    fn test_same_barrier_in_both_slots_counts_once() {
        let tests = vec![spec("a", "phase", "phase"), spec("b", "phase", "phase")];

        let sizes = RendezvousRegistry::derive_barriers(&tests);
        assert_eq!(sizes["phase"], 2);

        let registry = RendezvousRegistry::new(tests.len());
        registry.provision(&tests);
        assert_eq!(registry.barrier("phase").unwrap().required(), 2);
        assert_eq!(registry.barriers_of("a"), vec!["phase", READY_BARRIER, DONE_BARRIER]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shared_phase_barrier_releases_at_start_and_end() {
        let tests = vec![spec("a", "phase", "phase"), spec("b", "phase", "phase")];
        let registry = std::sync::Arc::new(RendezvousRegistry::new(tests.len()));
        registry.provision(&tests);

        for _ in 0..2 {
            let peer = {
                let registry = registry.clone();
                tokio::spawn(async move { registry.enter_barrier("phase").await })
            };
            let entered = registry.enter_barrier("phase");
            let outcome = tokio::time::timeout(Duration::from_secs(2), entered).await;
            assert_eq!(outcome.unwrap(), BarrierOutcome::Released);
            assert_eq!(peer.await.unwrap(), BarrierOutcome::Released);
        }
        assert_eq!(registry.barrier("phase").unwrap().releases(), 2);
    }

    #[test]
    fn test_reserved_names_always_use_group_size() {
        // Only two of three tests declare "ready", but it still needs all three
        let tests = vec![spec("a", "ready", ""), spec("b", "ready", ""), spec("c", "", "")];
        let sizes = RendezvousRegistry::derive_barriers(&tests);
        assert_eq!(sizes[READY_BARRIER], 3);
    }

    #[test]
    fn test_provision_creates_and_associates() {
        let tests = vec![spec("a", "loaded", ""), spec("b", "loaded", ""), spec("c", "", "")];
        let registry = RendezvousRegistry::new(tests.len());
        registry.provision(&tests);

        assert_eq!(registry.barrier("loaded").unwrap().required(), 2);
        assert_eq!(registry.barrier(READY_BARRIER).unwrap().required(), 3);
        assert_eq!(registry.barriers_of("a"), vec!["loaded", READY_BARRIER, DONE_BARRIER]);
        assert_eq!(registry.barriers_of("c"), vec![READY_BARRIER, DONE_BARRIER]);
    }

    #[test]
    fn test_provision_is_idempotent() {
        let tests = vec![spec("a", "loaded", ""), spec("b", "loaded", "")];
        let registry = RendezvousRegistry::new(tests.len());
        registry.provision(&tests);
        registry.provision(&tests);

        assert_eq!(registry.barriers_of("a").len(), 3);
        assert_eq!(registry.barrier("loaded").unwrap().required(), 2);
    }

    #[test]
    fn test_first_init_wins() {
        let registry = RendezvousRegistry::new(4);
        registry.init_barrier("a", "sync", 2);
        registry.init_barrier("b", "sync", 7);
        registry.init_barrier_default("c", "sync");

        assert_eq!(registry.barrier("sync").unwrap().required(), 2);
        assert_eq!(registry.barriers_of("b"), vec!["sync"]);
    }

    #[test]
    fn test_undeclared_barrier_sized_for_group() {
        let registry = RendezvousRegistry::new(1);
        assert_eq!(registry.enter_barrier_blocking("adhoc"), BarrierOutcome::Released);
        assert_eq!(registry.barrier("adhoc").unwrap().required(), 1);
    }

    #[test]
    fn test_three_way_ready_release() {
        let tests = vec![spec("a", "ready", ""), spec("b", "ready", ""), spec("c", "ready", "")];
        let registry = std::sync::Arc::new(RendezvousRegistry::new(tests.len()));
        assert_eq!(registry.provision(&tests)[READY_BARRIER], 3);

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.enter_barrier_blocking(READY_BARRIER))
            })
            .collect();

        wait_for_parked(&registry, READY_BARRIER, 2);
        assert_eq!(registry.enter_barrier_blocking(READY_BARRIER), BarrierOutcome::Released);
        for handle in handles {
            assert_eq!(handle.join().unwrap(), BarrierOutcome::Released);
        }
    }

    #[test]
    fn test_abandon_barriers_of_reporting_test() {
        let tests = vec![spec("a", "ready", ""), spec("b", "ready", ""), spec("c", "ready", "")];
        let registry = std::sync::Arc::new(RendezvousRegistry::new(tests.len()));
        registry.provision(&tests);

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.enter_barrier_blocking(READY_BARRIER))
            })
            .collect();
        wait_for_parked(&registry, READY_BARRIER, 2);

        let abandoned = registry.abandon_barriers_of("c");
        assert!(abandoned.contains(&READY_BARRIER.to_string()));

        for handle in handles {
            assert_eq!(handle.join().unwrap(), BarrierOutcome::Abandoned);
        }
        assert_eq!(registry.enter_barrier_blocking(READY_BARRIER), BarrierOutcome::Abandoned);
    }

    #[test]
    fn test_abandon_unknown() {
        let registry = RendezvousRegistry::new(2);
        assert!(!registry.abandon("missing"));
        assert!(registry.abandon_barriers_of("nobody").is_empty());
    }

    #[test]
    fn test_abandon_all() {
        let tests = vec![spec("a", "x", "y")];
        let registry = RendezvousRegistry::new(1);
        registry.provision(&tests);
        registry.abandon_all();

        for name in ["x", "y", READY_BARRIER, DONE_BARRIER] {
            assert_eq!(registry.barrier(name).unwrap().status(), BarrierStatus::Abandoned);
        }
    }

    #[test]
    fn test_snapshot_reports_every_barrier() {
        let tests = vec![spec("a", "x", "")];
        let registry = RendezvousRegistry::new(1);
        registry.provision(&tests);
        assert_eq!(registry.enter_barrier_blocking("x"), BarrierOutcome::Released);
        registry.abandon(DONE_BARRIER);

        let states = registry.snapshot();
        let names: Vec<&str> = states.iter().map(|(name, _, _)| name.as_str()).collect();
        assert_eq!(names, vec![DONE_BARRIER, READY_BARRIER, "x"]);
        assert_eq!(states[0].1, BarrierStatus::Abandoned);
        assert_eq!(states[1], (READY_BARRIER.to_string(), BarrierStatus::Open, 0));
        assert_eq!(states[2], ("x".to_string(), BarrierStatus::Released, 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_distinct_barriers_do_not_block_each_other() {
        let registry = std::sync::Arc::new(RendezvousRegistry::new(2));
        registry.init_barrier("a", "left", 2);
        registry.init_barrier("b", "right", 1);

        let parked = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.enter_barrier("left").await })
        };

        // "right" releases on its own while "left" is still waiting
        assert_eq!(registry.enter_barrier("right").await, BarrierOutcome::Released);
        assert!(!parked.is_finished());

        assert_eq!(registry.enter_barrier("left").await, BarrierOutcome::Released);
        assert_eq!(parked.await.unwrap(), BarrierOutcome::Released);
    }
}
