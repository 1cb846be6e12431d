//! Directory-backed [`ObjectStore`]: `{root}/{container}/{key}`.
//!
//! Used for local runs and end-to-end tests of the binary. Writes go to a hidden,
//! writer-unique `.partial` file first and are renamed into place, so readers never observe a
//! half-written object and overwrites are atomic on a single filesystem.
//! Media types are not persisted.

use async_trait::async_trait;
use speech_bucket_core::contract::{ObjectStore, StoreError};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::debug;

const PARTIAL_SUFFIX: &str = ".partial";

// Distinguishes concurrent writers of the same key within one process.
static PARTIAL_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_path(&self, container: &str) -> Result<PathBuf, StoreError> {
        if !is_plain_path(container) || container.contains('/') {
            return Err(StoreError::Backend(format!("invalid container name {container:?}")));
        }
        Ok(self.root.join(container))
    }

    /// Resolve an object path, refusing anything that could escape the container.
    fn object_path(&self, container: &str, key: &str) -> Result<PathBuf, StoreError> {
        let base = self.container_path(container)?;
        if !is_plain_path(key) || key.ends_with(PARTIAL_SUFFIX) {
            return Err(StoreError::Backend(format!("invalid object key {key:?}")));
        }
        Ok(base.join(key))
    }

    fn partial_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let n = PARTIAL_COUNTER.fetch_add(1, Ordering::Relaxed);
        path.with_file_name(format!(".{name}.{}-{n}{PARTIAL_SUFFIX}", std::process::id()))
    }

    async fn write_atomically(path: &Path, content: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let partial = Self::partial_path(path);
        fs::write(&partial, content).await.map_err(io_error)?;
        fs::rename(&partial, path).await.map_err(io_error)
    }
}

fn is_plain_path(segment: &str) -> bool {
    !segment.is_empty()
        && Path::new(segment)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

fn io_error(e: std::io::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, container: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path(container, key)?;
        match fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::not_found(container, key)),
            Err(e) => Err(io_error(e)),
        }
    }

    async fn put(
        &self,
        container: &str,
        key: &str,
        content: Vec<u8>,
        media_type: &str,
    ) -> Result<(), StoreError> {
        let path = self.object_path(container, key)?;
        debug!(path = %path.display(), %media_type, bytes = content.len(), "Writing object");
        Self::write_atomically(&path, &content).await
    }

    async fn exists(&self, container: &str, key: &str) -> Result<bool, StoreError> {
        let path = self.object_path(container, key)?;
        fs::try_exists(&path).await.map_err(io_error)
    }

    async fn copy(
        &self,
        src_container: &str,
        src_key: &str,
        dst_container: &str,
        dst_key: &str,
    ) -> Result<(), StoreError> {
        let src = self.object_path(src_container, src_key)?;
        let dst = self.object_path(dst_container, dst_key)?;
        let content = match fs::read(&src).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::not_found(src_container, src_key))
            }
            Err(e) => return Err(io_error(e)),
        };
        debug!(src = %src.display(), dst = %dst.display(), "Copying object");
        Self::write_atomically(&dst, &content).await
    }

    async fn delete(&self, container: &str, key: &str) -> Result<(), StoreError> {
        let path = self.object_path(container, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(e)),
        }
    }

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let base = self.container_path(container)?;

        let mut keys = Vec::new();
        let mut pending = vec![base.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(e)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
                let path = entry.path();
                if entry.file_type().await.map_err(io_error)?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&base) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.ends_with(PARTIAL_SUFFIX) {
                    continue;
                }
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }
}
