//! Per-base active-run registry.
//!
//! Holds the "is a scheduler loop running for this base" flag for every base.
//! The registry is a cloneable handle; every clone sees the same state, so it
//! can be shared between the queue manager and anything that needs to stop a
//! base from outside it.
//!
//! Each run is tagged with a generation number. Releasing or checking a run
//! only affects the entry if it still holds that generation, so a loop that
//! was stopped and superseded by a newer run can neither keep going nor clear
//! the newer run's flag.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;
use uuid::Uuid;

/// Thread-safe map of active scheduler runs keyed by base id.
///
/// The lock is never held across an `.await`.
#[derive(Clone, Default)]
pub struct ActiveRuns {
    runs: Arc<Mutex<HashMap<Uuid, u64>>>,
    next_generation: Arc<AtomicU64>,
}

impl ActiveRuns {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, u64>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a base active. Returns `None` if a run is already active.
    pub fn try_acquire(&self, base_id: Uuid) -> Option<RunGuard> {
        let mut runs = self.lock();
        if runs.contains_key(&base_id) {
            return None;
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        runs.insert(base_id, generation);
        Some(RunGuard {
            runs: self.clone(),
            base_id,
            generation,
        })
    }

    /// Whether a run is active for the base.
    pub fn is_active(&self, base_id: Uuid) -> bool {
        self.lock().contains_key(&base_id)
    }

    /// Clear the active flag for one base. Returns whether it was set.
    pub fn stop(&self, base_id: Uuid) -> bool {
        let stopped = self.lock().remove(&base_id).is_some();
        if stopped {
            debug!(%base_id, "Active run flag cleared");
        }
        stopped
    }

    /// Clear every active flag. Returns the bases that were active.
    pub fn stop_all(&self) -> Vec<Uuid> {
        let stopped: Vec<Uuid> = self.lock().drain().map(|(base_id, _)| base_id).collect();
        if !stopped.is_empty() {
            debug!(count = stopped.len(), "All active run flags cleared");
        }
        stopped
    }

    /// Bases with an active run.
    pub fn active_bases(&self) -> Vec<Uuid> {
        self.lock().keys().copied().collect()
    }

    fn holds(&self, base_id: Uuid, generation: u64) -> bool {
        self.lock().get(&base_id) == Some(&generation)
    }

    fn release(&self, base_id: Uuid, generation: u64) {
        let mut runs = self.lock();
        if runs.get(&base_id) == Some(&generation) {
            runs.remove(&base_id);
        }
    }
}

/// Scoped ownership of one base's active flag. Dropping it releases the flag.
pub struct RunGuard {
    runs: ActiveRuns,
    base_id: Uuid,
    generation: u64,
}

impl RunGuard {
    pub fn base_id(&self) -> Uuid {
        self.base_id
    }

    /// `false` once the run was stopped (and possibly superseded).
    pub fn is_current(&self) -> bool {
        self.runs.holds(self.base_id, self.generation)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.runs.release(self.base_id, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_refused() {
        let runs = ActiveRuns::new();
        let base = Uuid::new_v4();

        let guard = runs.try_acquire(base);
        assert!(guard.is_some());
        assert!(runs.try_acquire(base).is_none());
        assert!(runs.is_active(base));
    }

    #[test]
    fn test_drop_releases_flag() {
        let runs = ActiveRuns::new();
        let base = Uuid::new_v4();

        {
            let _guard = runs.try_acquire(base).unwrap();
            assert!(runs.is_active(base));
        }
        assert!(!runs.is_active(base));
        assert!(runs.try_acquire(base).is_some());
    }

    #[test]
    fn test_bases_are_independent() {
        let runs = ActiveRuns::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let _ga = runs.try_acquire(a).unwrap();
        let gb = runs.try_acquire(b);
        assert!(gb.is_some());
        assert_eq!(runs.active_bases().len(), 2);
    }

    #[test]
    fn test_stop_makes_guard_stale() {
        let runs = ActiveRuns::new();
        let base = Uuid::new_v4();

        let guard = runs.try_acquire(base).unwrap();
        assert!(guard.is_current());
        assert!(runs.stop(base));
        assert!(!guard.is_current());
        assert!(!runs.stop(base));
    }

    #[test]
    fn test_stale_guard_does_not_release_newer_run() {
        let runs = ActiveRuns::new();
        let base = Uuid::new_v4();

        let old = runs.try_acquire(base).unwrap();
        runs.stop(base);
        let new = runs.try_acquire(base).unwrap();

        assert!(!old.is_current());
        drop(old);
        assert!(new.is_current());
        assert!(runs.is_active(base));
    }

    #[test]
    fn test_stop_all() {
        let runs = ActiveRuns::new();
        let guards: Vec<_> = (0..3)
            .map(|_| runs.try_acquire(Uuid::new_v4()).unwrap())
            .collect();

        let stopped = runs.stop_all();
        assert_eq!(stopped.len(), 3);
        assert!(runs.active_bases().is_empty());
        assert!(guards.iter().all(|g| !g.is_current()));
    }

    #[test]
    fn test_clones_share_state() {
        let runs = ActiveRuns::new();
        let other = runs.clone();
        let base = Uuid::new_v4();

        let _guard = runs.try_acquire(base).unwrap();
        assert!(other.is_active(base));
        other.stop(base);
        assert!(!runs.is_active(base));
    }
}
