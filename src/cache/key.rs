//! Cache key derivation.

use super::Subcomponent;
use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Exact-match key for one cached subcomponent package.
///
/// Identical pinned revision ⇒ identical key. Any change to the marker
/// changes `content_hash` and invalidates the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubcomponentCacheKey {
    /// Subcomponent name
    pub component: String,
    /// Architecture tag
    pub arch_tag: String,
    /// Language-runtime version
    pub runtime_version: String,
    /// SHA-256 of the pinned-revision marker
    pub content_hash: String,
}

impl SubcomponentCacheKey {
    /// Derive the key by hashing the component's marker in `source_root`
    pub async fn derive(
        component: &Subcomponent,
        arch_tag: &str,
        runtime_version: &str,
        source_root: &Path,
    ) -> Result<Self> {
        let marker_path = source_root.join(&component.marker);
        let marker = tokio::fs::read(&marker_path)
            .await
            .map_err(|source| CacheError::MarkerUnreadable {
                path: marker_path.clone(),
                source,
            })?;

        Ok(Self {
            component: component.name.clone(),
            arch_tag: arch_tag.to_string(),
            runtime_version: runtime_version.to_string(),
            content_hash: content_hash(&marker),
        })
    }
}

impl fmt::Display for SubcomponentCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-rt{}-{}",
            self.component, self.arch_tag, self.runtime_version, self.content_hash
        )
    }
}

/// Hex SHA-256 of a pinned-revision marker
pub fn content_hash(marker: &[u8]) -> String {
    hex::encode(Sha256::digest(marker))
}
