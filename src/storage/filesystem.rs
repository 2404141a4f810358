//! Filesystem-backed object store
//!
//! Each key maps onto a file below the root directory. Writes go to a
//! temporary sibling first and are renamed into place, so readers never see a
//! partially written blob.

use crate::error::OtlpStorageError;
use crate::storage::ObjectStore;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, trace};
use uuid::Uuid;

const TEMP_SUFFIX: &str = ".tmp";

/// Object store rooted at a local directory
#[derive(Debug, Clone)]
pub struct FileSystemObjectStore {
    root: PathBuf,
}

impl FileSystemObjectStore {
    /// Open (and create if needed) a store rooted at `root`
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, OtlpStorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| OtlpStorageError::Io {
                key: root.display().to_string(),
                source,
            })?;

        info!(root = %root.display(), "Initialized filesystem object store");
        Ok(Self { root })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, OtlpStorageError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(OtlpStorageError::InvalidKey {
                key: key.to_string(),
                reason: "keys must be relative paths without '.' or '..' segments".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Option<Vec<&str>> = relative
            .components()
            .map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect();
        Some(segments?.join("/"))
    }

    /// Remove directories left empty by a delete, stopping at the root
    async fn prune_empty_parents(&self, path: &Path) {
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            // Fails on the first non-empty directory
            if tokio::fs::remove_dir(current).await.is_err() {
                break;
            }
            trace!(dir = %current.display(), "Pruned empty directory");
            dir = current.parent();
        }
    }
}

#[async_trait]
impl ObjectStore for FileSystemObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), OtlpStorageError> {
        let path = self.path_for(key)?;
        let io_err = |source| OtlpStorageError::Io {
            key: key.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let mut temp = path.clone().into_os_string();
        temp.push(format!(".{}{}", Uuid::new_v4().simple(), TEMP_SUFFIX));
        let temp = PathBuf::from(temp);

        if let Err(e) = tokio::fs::write(&temp, &bytes).await {
            // The partition may have been pruned by a concurrent delete
            if e.kind() != ErrorKind::NotFound {
                return Err(io_err(e));
            }
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
            tokio::fs::write(&temp, &bytes).await.map_err(io_err)?;
        }
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(io_err(e));
        }

        trace!(key = %key, size_bytes = bytes.len(), "Wrote object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, OtlpStorageError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path).await.map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                OtlpStorageError::NotFound(key.to_string())
            } else {
                OtlpStorageError::Io {
                    key: key.to_string(),
                    source,
                }
            }
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, OtlpStorageError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(OtlpStorageError::Io {
                        key: dir.display().to_string(),
                        source,
                    });
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(source) => {
                        return Err(OtlpStorageError::Io {
                            key: dir.display().to_string(),
                            source,
                        });
                    }
                };
                let path = entry.path();
                let file_type = match entry.file_type().await {
                    Ok(t) => t,
                    // Removed between read_dir and stat
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(source) => {
                        return Err(OtlpStorageError::Io {
                            key: path.display().to_string(),
                            source,
                        });
                    }
                };

                let Some(key) = self.key_for(&path) else {
                    continue;
                };
                if file_type.is_dir() {
                    // Only descend where the prefix can still match
                    let dir_key = format!("{}/", key);
                    if dir_key.starts_with(prefix) || prefix.starts_with(&dir_key) {
                        pending.push(path);
                    }
                } else if key.starts_with(prefix) && !key.ends_with(TEMP_SUFFIX) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        debug!(prefix = %prefix, count = keys.len(), "Listed objects");
        Ok(keys)
    }

    async fn list_prefixes(&self, prefix: &str) -> Result<Vec<String>, OtlpStorageError> {
        let dir = match prefix.trim_end_matches('/') {
            "" => self.root.clone(),
            trimmed => self.path_for(trimmed)?,
        };
        let io_err = |source| OtlpStorageError::Io {
            key: prefix.to_string(),
            source,
        };
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_err(source)),
        };

        let mut prefixes = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            match entry.file_type().await {
                Ok(t) if t.is_dir() => {}
                _ => continue,
            }
            if let Some(name) = entry.file_name().to_str() {
                prefixes.push(format!("{}{}/", prefix, name));
            }
        }
        prefixes.sort();
        Ok(prefixes)
    }

    async fn delete(&self, key: &str) -> Result<(), OtlpStorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.prune_empty_parents(&path).await;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(OtlpStorageError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}
