//! Lock-free holder of the active routing table.
//!
//! Readers load an `Arc` snapshot and never wait on the watcher; the watcher
//! swaps in a fully decoded table in one pointer store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::routes::RoutingConfig;

/// Shared, atomically replaceable routing table. `None` until the first
/// successful load.
#[derive(Default)]
pub struct ConfigStore {
    current: ArcSwapOption<RoutingConfig>,
    generation: AtomicU64,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current table snapshot, or `None` before the first install.
    pub fn get(&self) -> Option<Arc<RoutingConfig>> {
        self.current.load_full()
    }

    /// Install a new table. Returns the new generation number.
    pub fn replace(&self, config: RoutingConfig) -> u64 {
        self.current.store(Some(Arc::new(config)));
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Number of successful installs since startup.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
