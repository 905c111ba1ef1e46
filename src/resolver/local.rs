//! Local emote directory.
//!
//! Each emote lives in its own directory under the emotes root, named after
//! the emote, with an `info.json` descriptor pointing at the image file.

use super::{SourceLocation, SourceReference};
use crate::models::EmoteDescriptor;
use crate::{Error, Result};
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

pub const DESCRIPTOR_FILE: &str = "info.json";

/// Scan `emotes_path` for a directory named exactly `name`.
pub async fn find_local_emote(emotes_path: &Path, name: &str) -> Result<SourceReference> {
    let not_found = || Error::NotFound(format!("local emote '{}'", name));

    let mut entries = fs::read_dir(emotes_path).await.map_err(|e| {
        warn!("Cannot read emotes directory {}: {}", emotes_path.display(), e);
        not_found()
    })?;

    while let Some(entry) = entries.next_entry().await.map_err(|e| {
        warn!("Failed while scanning {}: {}", emotes_path.display(), e);
        not_found()
    })? {
        if entry.file_name().to_str() != Some(name) {
            continue;
        }

        let dir = entry.path();
        let descriptor = read_descriptor(&dir.join(DESCRIPTOR_FILE)).await.ok_or_else(not_found)?;
        let kind = descriptor.kind()?;

        let image_path = fs::canonicalize(dir.join(&descriptor.path))
            .await
            .map_err(|e| {
                warn!(
                    "Local emote {} points at missing file {}: {}",
                    name, descriptor.path, e
                );
                not_found()
            })?;

        debug!("Resolved local emote {} to {}", name, image_path.display());
        return Ok(SourceReference {
            original: image_path.to_string_lossy().into_owned(),
            kind,
            location: SourceLocation::File(image_path),
        });
    }

    Err(not_found())
}

async fn read_descriptor(path: &Path) -> Option<EmoteDescriptor> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Cannot read descriptor {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(descriptor) => Some(descriptor),
        Err(e) => {
            warn!("Malformed descriptor {}: {}", path.display(), e);
            None
        }
    }
}
