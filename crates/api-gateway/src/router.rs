//! Path-prefix routing against the live table.

use std::sync::Arc;

use crate::routes::ServiceRoute;
use crate::store::ConfigStore;

/// Read-only view over the [`ConfigStore`]. Cheap to clone (Arc).
#[derive(Clone)]
pub struct Router {
    store: Arc<ConfigStore>,
}

impl Router {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self { store }
    }

    /// Route for `path`, or `None` when nothing matches or no table has been
    /// loaded yet.
    pub fn match_path(&self, path: &str) -> Option<ServiceRoute> {
        let config = self.store.get()?;
        config.find(path).cloned()
    }
}
