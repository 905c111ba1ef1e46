//! Emote resizing and re-encoding
//!
//! Scales a source image into a bounding box while keeping its aspect ratio,
//! then encodes it as PNG (still), GIF (animated) or WebP (on request).

pub mod mock;
pub mod processor;

pub use mock::MockImageProcessor;
pub use processor::ImageProcessor;

use crate::models::{Dimensions, EmoteKind, OutputFormat};
use crate::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizedImage {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub dimensions: Dimensions,
}

#[async_trait]
pub trait ResizeService: Send + Sync {
    async fn resize(
        &self,
        image_data: &[u8],
        target: Dimensions,
        kind: EmoteKind,
        prefer_webp: bool,
    ) -> Result<ResizedImage>;
}

/// Size of `source` after a uniform scale into `target`.
///
/// The factor is `min(target_w / source_w, target_h / source_h)` and is not
/// capped at 1, so sources smaller than the box are scaled up.
pub fn scale_to_fit(source: Dimensions, target: Dimensions) -> Dimensions {
    let source_width = f64::from(source.width.max(1));
    let source_height = f64::from(source.height.max(1));
    let factor = f64::min(
        f64::from(target.width) / source_width,
        f64::from(target.height) / source_height,
    );

    let fit = |side: f64, limit: u32| ((factor * side).round() as u32).clamp(1, limit.max(1));

    Dimensions::new(
        fit(source_width, target.width),
        fit(source_height, target.height),
    )
}
