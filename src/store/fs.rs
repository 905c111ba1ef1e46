use super::ContentStore;
use crate::{Error, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Content store rooted at a local directory.
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key onto the filesystem, refusing anything that would leave `root`.
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let is_plain = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));

        if !is_plain {
            return Err(Error::Store(format!("Invalid content key: '{}'", key)));
        }
        Ok(self.root.join(relative))
    }

    // Write to a temp file beside the target, then rename over it
    fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::Store(format!("No parent directory for {}", path.display())))?;
        std::fs::create_dir_all(parent)?;

        let mut temp = NamedTempFile::new_in(parent)?;
        temp.write_all(data)?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let data = data.to_vec();

        let size = data.len();
        let target = path.clone();
        tokio::task::spawn_blocking(move || Self::write_atomic(&target, &data))
            .await
            .map_err(|e| Error::Invariant(format!("Content write task join error: {}", e)))??;

        debug!("Stored {} bytes at {}", size, path.display());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
