//! Subcomponent package cache.
//!
//! Subcomponents are dependency packages built from separately pinned source
//! trees. Their packages are cached under a [`SubcomponentCacheKey`] derived
//! from the component name, architecture, runtime version and the content hash
//! of the component's pinned-revision marker.
//!
//! - [`CacheStore`] is the storage backend (read-shared by jobs).
//! - [`CacheCoordinator`] restores packages for a job, exact match only.
//! - [`SubcomponentProducer`] is the run-global stage that fills the cache
//!   before any job of a branch restores from it.

mod coordinator;
mod key;
mod producer;
mod store;

pub use coordinator::{CacheCoordinator, CacheRestoration, RestoredPackage};
pub use key::{SubcomponentCacheKey, content_hash};
pub use producer::{ProductionReport, SubcomponentProducer};
pub use store::{CacheStore, LocalCacheStore};

use crate::config::SubcomponentConfig;
use std::path::PathBuf;

/// A named subcomponent and its pinned-revision marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subcomponent {
    /// Package name
    pub name: String,
    /// Marker file relative to the source checkout
    pub marker: PathBuf,
}

/// Fixed registry of subcomponents required by the top-level package
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubcomponentRegistry {
    components: Vec<Subcomponent>,
}

impl SubcomponentRegistry {
    /// Registry from the pipeline configuration
    pub fn from_config(config: &[SubcomponentConfig]) -> Self {
        Self {
            components: config
                .iter()
                .map(|c| Subcomponent {
                    name: c.name.clone(),
                    marker: c.marker.clone(),
                })
                .collect(),
        }
    }

    /// Registered subcomponents in declaration order
    pub fn components(&self) -> &[Subcomponent] {
        &self.components
    }

    /// Look up one subcomponent by name
    pub fn get(&self, name: &str) -> Option<&Subcomponent> {
        self.components.iter().find(|c| c.name == name)
    }
}
