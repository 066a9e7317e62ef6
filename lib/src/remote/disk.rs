// Copyright 2023 The Jujutsu Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A [`Remote`] backed by a directory on the local filesystem.
//!
//! Used both as `origin` for a disk-to-disk clone and, transitively, as the
//! repository's own object store (the store is just a remote the engine
//! always has local access to).

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::file_util;
use crate::remote::Remote;
use crate::remote::RemoteError;

/// A [`Remote`] backed by a directory, with an in-memory cache of bytes
/// already read from disk. The cache is content-addressed the same way the
/// store itself is (every object is written once and never mutated), so a
/// cached entry never goes stale -- it just saves a re-read of the same
/// bytes across repeated `get` calls (e.g. while walking reachable objects
/// during push/fetch). `delete` still drops the entry, since config/HEAD/log
/// paths on this same trait are mutable.
pub struct DiskRemote {
    root: PathBuf,
    read_cache: Mutex<HashMap<String, Vec<u8>>>,
}

impl DiskRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            read_cache: Mutex::new(HashMap::new()),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, RemoteError> {
        file_util::safe_join(&self.root, path).map_err(|_| RemoteError::InvalidPath {
            path: path.to_string(),
        })
    }

    fn unavailable(path: &str, source: std::io::Error) -> RemoteError {
        RemoteError::Unavailable {
            path: path.to_string(),
            source: Box::new(source),
        }
    }
}

#[async_trait]
impl Remote for DiskRemote {
    async fn exists(&self, path: &str) -> Result<bool, RemoteError> {
        let full_path = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&full_path)
            .await
            .map_err(|e| Self::unavailable(path, e))?)
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        if let Some(cached) = self.read_cache.lock().unwrap().get(path) {
            return Ok(cached.clone());
        }
        let full_path = self.resolve(path)?;
        match tokio::fs::read(&full_path).await {
            Ok(content) => {
                self.read_cache
                    .lock()
                    .unwrap()
                    .insert(path.to_string(), content.clone());
                Ok(content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RemoteError::NotFound {
                path: path.to_string(),
            }),
            Err(e) => Err(Self::unavailable(path, e)),
        }
    }

    async fn put(&self, path: &str, content: &[u8]) -> Result<(), RemoteError> {
        let full_path = self.resolve(path)?;
        if tokio::fs::try_exists(&full_path)
            .await
            .map_err(|e| Self::unavailable(path, e))?
        {
            return Ok(());
        }
        let dir = full_path
            .parent()
            .expect("resolved path always has a parent under root")
            .to_path_buf();
        let content = content.to_vec();
        let path_owned = path.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), RemoteError> {
            std::fs::create_dir_all(&dir).map_err(|e| Self::unavailable(&path_owned, e))?;
            let mut temp_file =
                NamedTempFile::new_in(&dir).map_err(|e| Self::unavailable(&path_owned, e))?;
            std::io::Write::write_all(&mut temp_file, &content)
                .map_err(|e| Self::unavailable(&path_owned, e))?;
            file_util::persist_content_addressed_temp_file(temp_file, &full_path)
                .map_err(|e| Self::unavailable(&path_owned, e))?;
            Ok(())
        })
        .await
        .expect("blocking write task does not panic")?;
        self.read_cache.lock().unwrap().remove(path);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        let full_path = self.resolve(path)?;
        self.read_cache.lock().unwrap().remove(path);
        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(_) if !full_path.exists() => Ok(()),
            Err(e) => Err(Self::unavailable(path, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        let base = self.resolve(prefix)?;
        let mut result = Vec::new();
        collect_files(&self.root, &base, &mut result)
            .await
            .map_err(|e| Self::unavailable(prefix, e))?;
        Ok(result)
    }
}

async fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    if !tokio::fs::try_exists(dir).await? {
        return Ok(());
    }
    let metadata = tokio::fs::metadata(dir).await?;
    if metadata.is_file() {
        out.push(relative_slash_path(root, dir));
        return Ok(());
    }
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut children = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        children.push(entry.path());
    }
    children.sort();
    for child in children {
        Box::pin(collect_files(root, &child, out)).await?;
    }
    Ok(())
}

fn relative_slash_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .expect("collected path is always under root")
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let remote = DiskRemote::new(dir.path());
        remote.put("objects/blobs/ab/cdef", b"hello").await.unwrap();
        assert!(remote.exists("objects/blobs/ab/cdef").await.unwrap());
        assert_eq!(remote.get("objects/blobs/ab/cdef").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let remote = DiskRemote::new(dir.path());
        remote.put("a", b"hello").await.unwrap();
        remote.put("a", b"hello").await.unwrap();
        assert_eq!(remote.get("a").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let remote = DiskRemote::new(dir.path());
        assert!(matches!(
            remote.get("missing").await,
            Err(RemoteError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let remote = DiskRemote::new(dir.path());
        assert!(matches!(
            remote.list("../escape").await,
            Err(RemoteError::InvalidPath { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_is_served_from_cache_after_first_read() {
        let dir = tempfile::tempdir().unwrap();
        let remote = DiskRemote::new(dir.path());
        remote.put("a", b"hello").await.unwrap();
        assert_eq!(remote.get("a").await.unwrap(), b"hello");
        // Removing the file on disk behind the remote's back proves a
        // second `get` is answered from the cache, not a re-read.
        std::fs::remove_file(dir.path().join("a")).unwrap();
        assert_eq!(remote.get("a").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_delete_invalidates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let remote = DiskRemote::new(dir.path());
        remote.put("a", b"hello").await.unwrap();
        remote.get("a").await.unwrap();
        remote.delete("a").await.unwrap();
        assert!(matches!(remote.get("a").await, Err(RemoteError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_list_returns_files_under_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let remote = DiskRemote::new(dir.path());
        remote.put("objects/blobs/aa/1", b"1").await.unwrap();
        remote.put("objects/blobs/bb/2", b"2").await.unwrap();
        let mut listed = remote.list("objects/blobs").await.unwrap();
        listed.sort();
        assert_eq!(listed, vec!["objects/blobs/aa/1", "objects/blobs/bb/2"]);
    }
}
