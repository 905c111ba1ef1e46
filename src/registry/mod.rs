//! Image registry
//!
//! Tracks every original image and the size-specific renditions produced from
//! it. The registry owns the rendition lifecycle: a rendition is created
//! unprocessed when first requested, marked processed once its bytes are in the
//! content store, and never changes after that.

pub mod sqlite;

pub use sqlite::SqliteRegistry;

use crate::models::{Dimensions, EmoteKind, OutputFormat, Rendition, RenditionKey, SourceImage};
use crate::Result;
use async_trait::async_trait;

/// Result of asking the registry for a rendition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// Already processed; serve it.
    Ready(Rendition),
    /// Another request holds the claim and the job has not finished.
    InFlight(Rendition),
    /// A fresh unprocessed row was created; the caller must produce it.
    Claimed(Rendition),
}

#[async_trait]
pub trait ImageRegistry: Send + Sync {
    async fn get_or_create_image(&self, original: &str) -> Result<SourceImage>;

    async fn claim_rendition(
        &self,
        image: &SourceImage,
        key: RenditionKey,
        kind: EmoteKind,
    ) -> Result<Claim>;

    async fn complete_rendition(
        &self,
        id: i64,
        format: OutputFormat,
        output: Dimensions,
    ) -> Result<Rendition>;

    /// Drop an unprocessed claim so a later request can try again.
    async fn release_rendition(&self, id: i64) -> Result<()>;

    /// Forget a processed rendition whose stored bytes are gone.
    async fn invalidate_rendition(&self, id: i64) -> Result<()>;

    /// Remove claims abandoned by a previous process. Returns how many were cleared.
    async fn reset_unprocessed(&self) -> Result<usize>;
}
