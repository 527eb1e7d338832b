//! Filesystem artifact store.
//!
//! Layout under the root directory:
//!
//! ```text
//! objects/ab/cdef...   one file per object, named by its hex digest
//! refs/ab/cdef...      the object's reference count, in decimal
//! tmp/<uuid>           in-progress writes
//! ```
//!
//! An object is written to `tmp/` first and then hard-linked into place.
//! The link fails with `AlreadyExists` when another writer got there first,
//! which is the deduplication path; readers never observe a partial object.
//! Reference counts are rewritten through `tmp/` and renamed over the old
//! count after every `put`.

use super::ArtifactStore;
use crate::core::{content_key, ArtifactRef, KEY_PREFIX};
use crate::errors::StoreError;
use crate::utils::generate_uuid;
use async_trait::async_trait;
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// Content-addressed store on the local filesystem.
#[derive(Debug)]
pub struct FsArtifactStore {
    root: PathBuf,
    refs: DashMap<String, u64>,
    /// Serializes reference-count writes so the newest count lands last.
    refs_write: Mutex<()>,
}

impl FsArtifactStore {
    /// Opens (creating if needed) a store rooted at `root`.
    ///
    /// Objects already on disk are indexed with their recorded reference
    /// count, or one when no count was recorded.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the directories cannot be created or scanned.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("objects")).await?;
        tokio::fs::create_dir_all(root.join("tmp")).await?;

        let refs = DashMap::new();
        let mut shards = tokio::fs::read_dir(root.join("objects")).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let prefix = shard.file_name().to_string_lossy().into_owned();
            let mut objects = tokio::fs::read_dir(shard.path()).await?;
            while let Some(object) = objects.next_entry().await? {
                let rest = object.file_name().to_string_lossy().into_owned();
                let count = read_count(&root.join("refs").join(&prefix).join(&rest)).await?;
                refs.insert(format!("{KEY_PREFIX}{prefix}{rest}"), count.unwrap_or(1));
            }
        }

        debug!(root = %root.display(), objects = refs.len(), "Opened artifact store");
        Ok(Self {
            root,
            refs,
            refs_write: Mutex::new(()),
        })
    }

    /// Returns the store's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns where the object for `key` lives.
    #[must_use]
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.sharded_path("objects", key)
    }

    /// Returns where the reference count for `key` is recorded.
    #[must_use]
    pub fn refs_path(&self, key: &str) -> PathBuf {
        self.sharded_path("refs", key)
    }

    fn sharded_path(&self, dir: &str, key: &str) -> PathBuf {
        let digest = key.strip_prefix(KEY_PREFIX).unwrap_or(key);
        let (shard, rest) = if digest.len() > 2 && digest.is_char_boundary(2) {
            digest.split_at(2)
        } else {
            ("_", digest)
        };
        self.root.join(dir).join(shard).join(rest)
    }

    async fn write_count(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.refs_write.lock().await;
        let count = self.ref_count(key);
        let target = self.refs_path(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.root.join("tmp").join(generate_uuid().to_string());
        tokio::fs::write(&tmp, count.to_string()).await?;
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }

    async fn write_object(&self, key: &str, bytes: &[u8]) -> Result<bool, StoreError> {
        let target = self.object_path(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.root.join("tmp").join(generate_uuid().to_string());
        tokio::fs::write(&tmp, bytes).await?;
        let linked = match tokio::fs::hard_link(&tmp, &target).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err),
        };
        let _ = tokio::fs::remove_file(&tmp).await;
        linked.map_err(StoreError::from)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, bytes: &[u8], produced_by: &str, name: &str) -> Result<ArtifactRef, StoreError> {
        let artifact = ArtifactRef::for_content(bytes, produced_by, name);
        let created = self.write_object(&artifact.key, bytes).await?;
        *self.refs.entry(artifact.key.clone()).or_insert(0) += 1;
        self.write_count(&artifact.key).await?;
        trace!(key = %artifact.key, created, "Artifact put");
        Ok(artifact)
    }

    async fn get(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, StoreError> {
        let bytes = match tokio::fs::read(self.object_path(&artifact.key)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    key: artifact.key.clone(),
                })
            }
            Err(err) => return Err(err.into()),
        };
        let actual = content_key(&bytes);
        if actual != artifact.key {
            return Err(StoreError::Corrupt {
                key: artifact.key.clone(),
                actual,
            });
        }
        Ok(bytes)
    }

    async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(tokio::fs::try_exists(self.object_path(key)).await?)
    }

    fn len(&self) -> usize {
        self.refs.len()
    }

    fn ref_count(&self, key: &str) -> u64 {
        self.refs.get(key).map_or(0, |r| *r)
    }
}

async fn read_count(path: &Path) -> Result<Option<u64>, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => match text.trim().parse() {
            Ok(count) => Ok(Some(count)),
            Err(_) => {
                warn!(path = %path.display(), "Ignoring malformed reference count");
                Ok(None)
            }
        },
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_put_writes_sharded_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).await.unwrap();

        let artifact = store.put(b"tarball", "build", "app.tar").await.unwrap();
        let path = store.object_path(&artifact.key);

        assert!(path.starts_with(dir.path().join("objects").join(&artifact.digest()[..2])));
        assert_eq!(std::fs::read(&path).unwrap(), b"tarball");
        assert_eq!(store.get(&artifact).await.unwrap(), b"tarball");
    }

    #[tokio::test]
    async fn test_duplicate_put_keeps_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsArtifactStore::open(dir.path()).await.unwrap());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.put(b"same", &format!("job{i}"), "out").await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.len(), 1);
        assert_eq!(store.ref_count(&content_key(b"same")), 4);
        let leftovers = std::fs::read_dir(dir.path().join("tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_reopen_indexes_existing_objects() {
        let dir = tempfile::tempdir().unwrap();
        let key = {
            let store = FsArtifactStore::open(dir.path()).await.unwrap();
            store.put(b"persisted", "build", "a").await.unwrap().key
        };

        let reopened = FsArtifactStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.contains(&key).await.unwrap());
        assert_eq!(reopened.ref_count(&key), 1);
    }

    #[tokio::test]
    async fn test_reopen_keeps_reference_counts() {
        let dir = tempfile::tempdir().unwrap();
        let key = {
            let store = FsArtifactStore::open(dir.path()).await.unwrap();
            for job in ["build", "rebuild", "package"] {
                store.put(b"same tarball", job, "app.tar").await.unwrap();
            }
            content_key(b"same tarball")
        };

        let reopened = FsArtifactStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.ref_count(&key), 3);
        assert_eq!(std::fs::read_to_string(reopened.refs_path(&key)).unwrap(), "3");

        reopened.put(b"same tarball", "deploy", "app.tar").await.unwrap();
        assert_eq!(reopened.ref_count(&key), 4);
    }

    #[tokio::test]
    async fn test_object_without_count_file_defaults_to_one() {
        let dir = tempfile::tempdir().unwrap();
        let key = {
            let store = FsArtifactStore::open(dir.path()).await.unwrap();
            let key = store.put(b"legacy", "build", "a").await.unwrap().key;
            std::fs::remove_file(store.refs_path(&key)).unwrap();
            key
        };

        let reopened = FsArtifactStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.ref_count(&key), 1);
    }

    #[tokio::test]
    async fn test_corrupt_object_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).await.unwrap();
        let artifact = store.put(b"original", "build", "a").await.unwrap();

        std::fs::write(store.object_path(&artifact.key), b"tampered").unwrap();

        let err = store.get(&artifact).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_missing_object_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::open(dir.path()).await.unwrap();
        let artifact = ArtifactRef::for_content(b"absent", "build", "a");

        assert!(matches!(store.get(&artifact).await, Err(StoreError::NotFound { .. })));
        assert!(!store.contains(&artifact.key).await.unwrap());
    }
}
