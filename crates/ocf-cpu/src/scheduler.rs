//! Core scheduling state

use crate::core::{Core, NUM_CORES};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Tracks the three Espresso cores and which one the calling guest
/// thread currently occupies
///
/// A host call made from a system call handler may block and let the
/// guest thread migrate to a different core, so dispatch must re-fetch
/// the current core after the handler returns before writing results.
pub struct CoreScheduler {
    cores: [Arc<Mutex<Core>>; NUM_CORES],
    current: AtomicUsize,
}

impl CoreScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            cores: std::array::from_fn(|id| Arc::new(Mutex::new(Core::new(id as u32)))),
            current: AtomicUsize::new(1),
        })
    }

    /// The core the calling guest thread is currently running on
    pub fn current(&self) -> Arc<Mutex<Core>> {
        Arc::clone(&self.cores[self.current.load(Ordering::Acquire)])
    }

    /// Index of the current core
    pub fn current_id(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Move the calling guest thread to another core
    pub fn set_current(&self, id: usize) {
        assert!(id < NUM_CORES);
        self.current.store(id, Ordering::Release);
    }

    /// A specific core by index
    pub fn core(&self, id: usize) -> Arc<Mutex<Core>> {
        Arc::clone(&self.cores[id])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_core_migration() {
        let sched = CoreScheduler::new();
        assert_eq!(sched.current_id(), 1);

        sched.current().lock().gpr[3] = 42;
        sched.set_current(2);
        assert_eq!(sched.current().lock().gpr[3], 0);

        sched.set_current(1);
        assert_eq!(sched.current().lock().gpr[3], 42);
    }
}
