//! Content store for processed renditions
//!
//! A flat key space of rendition bytes. Keys are the relative paths handed
//! out by the image registry.

pub mod fs;
pub mod mock;

pub use fs::FsContentStore;
pub use mock::MockContentStore;

use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `data` under `key`. Readers never observe a partially written value.
    async fn put(&self, key: &str, data: &[u8]) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
}
