//! Database-backed namespace and emote catalog
//!
//! Namespaces form a hierarchy addressed by slash-separated paths
//! (`streamers/alice`), and each namespace holds emotes addressed by slug.

pub mod sqlite;

pub use sqlite::SqliteCatalog;

use crate::models::{CatalogEmote, Namespace};
use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait NamespaceCatalog: Send + Sync {
    async fn find_namespace(&self, path: &str) -> Result<Option<Namespace>>;
    async fn find_emote(&self, namespace: &Namespace, slug: &str) -> Result<Option<CatalogEmote>>;
}

/// Split a namespace path into its non-empty segments.
pub fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}
