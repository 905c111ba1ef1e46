//! Source resolution
//!
//! Turns a `(namespace, name)` pair into the original image behind an emote.
//! No namespace means the local emote directory; a namespace whose first
//! segment names a provider goes out to that provider's API; anything else is
//! a path into the database catalog.
//!
//! Filesystem and provider failures never escape this module: they are
//! logged and reported as [`Error::NotFound`].

pub mod local;

use crate::catalog::{path_segments, NamespaceCatalog};
use crate::models::{Config, EmoteKind};
use crate::provider::{EmoteProvider, Provider};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Where an emote should be looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmoteReference {
    Local {
        name: String,
    },
    Provider {
        provider: Provider,
        channel: String,
        name: String,
    },
    Catalog {
        path: String,
        slug: String,
    },
}

impl EmoteReference {
    pub fn parse(namespace: Option<&str>, name: &str) -> Result<Self> {
        let Some(namespace) = namespace else {
            return Ok(EmoteReference::Local {
                name: name.to_string(),
            });
        };

        let segments = path_segments(namespace);
        let Some(first) = segments.first() else {
            return Err(Error::NotFound(format!("empty namespace for '{}'", name)));
        };

        match Provider::from_segment(first) {
            Some(provider) => {
                let channel = segments.get(1).ok_or_else(|| {
                    Error::NotFound(format!("{} namespace without a channel", provider))
                })?;
                Ok(EmoteReference::Provider {
                    provider,
                    channel: channel.to_string(),
                    name: name.to_string(),
                })
            }
            None => Ok(EmoteReference::Catalog {
                path: segments.join("/"),
                slug: name.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    File(PathBuf),
    Memory(Vec<u8>),
}

/// A resolved original image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReference {
    /// Stable identity of the original; the registry deduplicates on it.
    pub original: String,
    pub kind: EmoteKind,
    pub location: SourceLocation,
}

impl SourceReference {
    /// Read the original bytes. A file that has disappeared is `NotFound`.
    pub async fn load(&self) -> Result<Vec<u8>> {
        match &self.location {
            SourceLocation::Memory(bytes) => Ok(bytes.clone()),
            SourceLocation::File(path) => tokio::fs::read(path).await.map_err(|e| {
                warn!("Cannot read source image {}: {}", path.display(), e);
                Error::NotFound(format!("source image {}", path.display()))
            }),
        }
    }
}

pub struct SourceResolver {
    emotes_path: PathBuf,
    uploads_path: PathBuf,
    catalog: Arc<dyn NamespaceCatalog>,
    provider: Arc<dyn EmoteProvider>,
}

impl SourceResolver {
    pub fn new(
        config: &Config,
        catalog: Arc<dyn NamespaceCatalog>,
        provider: Arc<dyn EmoteProvider>,
    ) -> Self {
        Self {
            emotes_path: config.emotes_path.clone(),
            uploads_path: config.uploads_path.clone(),
            catalog,
            provider,
        }
    }

    pub async fn resolve(&self, namespace: Option<&str>, name: &str) -> Result<SourceReference> {
        match EmoteReference::parse(namespace, name)? {
            EmoteReference::Local { name } => local::find_local_emote(&self.emotes_path, &name).await,
            EmoteReference::Provider {
                provider,
                channel,
                name,
            } => self.resolve_provider(provider, &channel, &name).await,
            EmoteReference::Catalog { path, slug } => self.resolve_catalog(&path, &slug).await,
        }
    }

    async fn resolve_provider(
        &self,
        provider: Provider,
        channel: &str,
        name: &str,
    ) -> Result<SourceReference> {
        let original = format!("{}/{}/{}", provider, channel, name);

        let bytes = match self.provider.fetch_emote(provider, channel, name).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Provider lookup for {} failed: {}", original, e);
                return Err(Error::NotFound(original));
            }
        };

        if let Err(e) = decode_check(bytes.clone()).await {
            warn!("Provider returned undecodable image for {}: {}", original, e);
            return Err(Error::NotFound(original));
        }

        debug!("Fetched {} ({} bytes)", original, bytes.len());
        Ok(SourceReference {
            original,
            kind: EmoteKind::Static,
            location: SourceLocation::Memory(bytes),
        })
    }

    async fn resolve_catalog(&self, path: &str, slug: &str) -> Result<SourceReference> {
        let namespace = self
            .catalog
            .find_namespace(path)
            .await?
            .ok_or_else(|| Error::NotFound(format!("namespace '{}'", path)))?;

        let emote = self
            .catalog
            .find_emote(&namespace, slug)
            .await?
            .ok_or_else(|| Error::NotFound(format!("emote '{}' in namespace '{}'", slug, path)))?;

        let image_path = self.upload_path(&emote.original);
        Ok(SourceReference {
            original: image_path.to_string_lossy().into_owned(),
            kind: emote.kind,
            location: SourceLocation::File(image_path),
        })
    }

    fn upload_path(&self, original: &str) -> PathBuf {
        let path = Path::new(original);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.uploads_path.join(path)
        }
    }
}

/// Fully decode downloaded bytes so a bad body never reaches a resize job.
async fn decode_check(bytes: Vec<u8>) -> Result<()> {
    tokio::task::spawn_blocking(move || image::load_from_memory(&bytes).map(|_| ()))
        .await
        .map_err(|e| Error::Invariant(format!("Decode task join error: {}", e)))??;
    Ok(())
}
