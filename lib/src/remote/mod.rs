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

//! The `Remote` transport abstraction and its three backends.
//!
//! A remote is a flat, path-addressed key-value store: `exists`, `get`,
//! `put`, `delete`, `list`. Everything above this line -- the object store,
//! fetch/push, clone -- is written against the trait alone and doesn't know
//! or care whether the bytes end up on local disk, behind an HTTP API, or in
//! an S3 bucket.

pub mod disk;
pub mod http;
pub mod s3;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Requests time out after this long by default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// At most this many uploads run concurrently against a single remote.
pub const MAX_PARALLEL_UPLOADS: usize = 5;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("object not found at {path}")]
    NotFound { path: String },
    #[error("remote at {path} is unavailable")]
    Unavailable {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("precondition failed writing {path} (object already exists with different content)")]
    PreconditionFailed { path: String },
    #[error("write to {path} was forbidden (missing or invalid signature)")]
    Forbidden { path: String },
    #[error("remote returned an unparseable response for {path}")]
    BadResponse { path: String, detail: String },
    #[error("path {path} is not valid for this remote")]
    InvalidPath { path: String },
}

/// A uniform, path-addressed transport. Paths are always `/`-separated and
/// relative to the remote's own root (e.g. `objects/blobs/ab/cdef`).
#[async_trait]
pub trait Remote: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool, RemoteError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, RemoteError>;

    /// Writes `content` at `path`. Implementations MUST treat this as a
    /// no-op if `path` already exists (the caller only ever writes
    /// content-addressed data, so an existing object at the same path always
    /// has the same bytes).
    async fn put(&self, path: &str, content: &[u8]) -> Result<(), RemoteError>;

    async fn delete(&self, path: &str) -> Result<(), RemoteError>;

    /// Lists every path stored under `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, RemoteError>;
}

#[async_trait]
impl Remote for Box<dyn Remote> {
    async fn exists(&self, path: &str) -> Result<bool, RemoteError> {
        (**self).exists(path).await
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        (**self).get(path).await
    }

    async fn put(&self, path: &str, content: &[u8]) -> Result<(), RemoteError> {
        (**self).put(path, content).await
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        (**self).delete(path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        (**self).list(prefix).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::Remote;
    use super::RemoteError;

    /// An in-memory remote used to exercise code written against the
    /// [`Remote`] trait without touching disk or network.
    #[derive(Default)]
    pub struct MemoryRemote {
        objects: Mutex<BTreeMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl Remote for MemoryRemote {
        async fn exists(&self, path: &str) -> Result<bool, RemoteError> {
            Ok(self.objects.lock().unwrap().contains_key(path))
        }

        async fn get(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
            self.objects
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| RemoteError::NotFound {
                    path: path.to_string(),
                })
        }

        async fn put(&self, path: &str, content: &[u8]) -> Result<(), RemoteError> {
            self.objects
                .lock()
                .unwrap()
                .entry(path.to_string())
                .or_insert_with(|| content.to_vec());
            Ok(())
        }

        async fn delete(&self, path: &str) -> Result<(), RemoteError> {
            self.objects.lock().unwrap().remove(path);
            Ok(())
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
            Ok(self
                .objects
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }
    }

    #[tokio::test]
    async fn test_memory_remote_roundtrip() {
        let remote = MemoryRemote::default();
        assert!(!remote.exists("a").await.unwrap());
        remote.put("a", b"hello").await.unwrap();
        assert!(remote.exists("a").await.unwrap());
        assert_eq!(remote.get("a").await.unwrap(), b"hello");
        assert_eq!(remote.list("a").await.unwrap(), vec!["a".to_string()]);
        remote.delete("a").await.unwrap();
        assert!(!remote.exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_remote_put_is_idempotent() {
        let remote = MemoryRemote::default();
        remote.put("a", b"hello").await.unwrap();
        remote.put("a", b"hello").await.unwrap();
        assert_eq!(remote.get("a").await.unwrap(), b"hello");
    }
}
