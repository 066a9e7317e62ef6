// Copyright 2021 The Jujutsu Authors
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

//! The repository engine: everything that turns the primitives in
//! [`crate::scan`], [`crate::tree_ops`], [`crate::tree_rebuild`] and
//! [`crate::object_store`] into `init`/`commit`/`checkout`/`fetch`/`push`/
//! `rebase`/`clone`.
//!
//! A [`Repository`] owns exactly one mutable pointer (`HEAD`) and one
//! tracked remote (`origin`); every operation here is written against that
//! single-branch, single-remote model.

use std::collections::HashMap;
use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use thiserror::Error;

use crate::changelog;
use crate::changelog::LogEntry;
use crate::changelog::LogError;
use crate::config::Config;
use crate::config::ConfigError;
use crate::config::RemoteConfig;
use crate::config::RemoteKind;
use crate::file_util;
use crate::file_util::PathError;
use crate::head;
use crate::head::HeadError;
use crate::hex_util;
use crate::ignore::IgnoreMatcher;
use crate::ignore::InvalidPattern;
use crate::object_id::CommitId;
use crate::object_id::ObjectId as _;
use crate::object_id::TreeId;
use crate::object_store::ObjectStore;
use crate::object_store::StoreError;
use crate::objects::Blob;
use crate::objects::Commit;
use crate::objects::Mode;
use crate::objects::ObjectKind;
use crate::remote;
use crate::remote::disk::DiskRemote;
use crate::remote::http::HttpRemote;
use crate::remote::s3::S3Remote;
use crate::remote::Remote;
use crate::remote::RemoteError;
use crate::repo_path::InvalidRepoPathComponent;
use crate::repo_path::RepoPathBuf;
use crate::scan;
use crate::scan::ChangeState;
use crate::scan::FileRef;
use crate::scan::ScanError;
use crate::signing::RequestSigner;
use crate::signing::SigningError;
use crate::tree_ops;
use crate::tree_rebuild;
use crate::tree_rebuild::RebuildError;

use futures::StreamExt as _;
use futures::TryStreamExt as _;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Head(#[from] HeadError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Rebuild(#[from] RebuildError),
    #[error(transparent)]
    InvalidIgnorePattern(#[from] InvalidPattern),
    #[error(transparent)]
    InvalidName(#[from] InvalidRepoPathComponent),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error("HEAD has no commit yet")]
    MissingHead,
    #[error("no tracked remote is configured (set core.remote in .wild/config)")]
    MissingRemote,
    #[error("no private key found at .wild/secrets")]
    MissingPrivateKey,
    #[error("local and remote history share no common ancestor")]
    MissingCommonAncestor,
}

/// A status event a [`Repository`] operation emits at a notable milestone.
/// Delivered synchronously to whatever [`Observer`] the repository was
/// built with; there is no process-wide event bus to subscribe to instead.
#[derive(Debug, Clone)]
pub enum RepoEvent {
    ScanComplete { changed: usize },
    BlobStored { path: RepoPathBuf },
    TreeRebuilt { hash: TreeId },
    CommitCreated { hash: CommitId },
    CheckoutStarted { hash: CommitId },
    FileMaterialized { path: RepoPathBuf },
    FetchedObject { kind: ObjectKind, hash: String },
    PushedObject { kind: ObjectKind, hash: String },
    RebaseReplayed { original: CommitId, replayed: CommitId },
}

/// Receives [`RepoEvent`]s as a [`Repository`] operation progresses.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: RepoEvent);
}

/// An on-disk repository rooted at some working directory, with a
/// `.wild/` control directory alongside it.
pub struct Repository {
    base: PathBuf,
    wild_dir: PathBuf,
    store: ObjectStore<DiskRemote>,
    ignore: IgnoreMatcher,
    observer: Option<Arc<dyn Observer>>,
}

impl Repository {
    /// Initializes a fresh, empty repository at `base`, creating `.wild/`
    /// with an empty HEAD, log, and config if one doesn't already exist.
    pub fn init(base: &Path) -> Result<Self, RepoError> {
        let wild_dir = base.join(".wild");
        std::fs::create_dir_all(wild_dir.join("objects"))?;
        std::fs::create_dir_all(wild_dir.join("remotes").join("origin"))?;

        let head_path = wild_dir.join("HEAD");
        if !head_path.exists() {
            head::write(&head_path, None, Utc::now())?;
        }
        let logs_path = wild_dir.join("logs");
        if !logs_path.exists() {
            file_util::IoResultExt::context(
                std::fs::write(&logs_path, changelog::render_empty()),
                &logs_path,
            )?;
        }
        let config_path = wild_dir.join("config");
        if !config_path.exists() {
            file_util::IoResultExt::context(
                std::fs::write(&config_path, Config::default().render()),
                &config_path,
            )?;
        }

        Self::open(base)
    }

    /// Opens an already-initialized repository at `base`.
    pub fn open(base: &Path) -> Result<Self, RepoError> {
        let base = base.to_path_buf();
        let wild_dir = base.join(".wild");
        let store = ObjectStore::new(DiskRemote::new(wild_dir.clone()));
        let ignore = Self::load_ignore(&base)?;
        Ok(Self {
            base,
            wild_dir,
            store,
            ignore,
            observer: None,
        })
    }

    /// Attaches an [`Observer`] that receives every [`RepoEvent`] this
    /// repository emits from here on.
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn notify(&self, event: RepoEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(event);
        }
    }

    fn load_ignore(base: &Path) -> Result<IgnoreMatcher, RepoError> {
        let path = base.join(".wildignore");
        let user_patterns = if path.exists() {
            file_util::IoResultExt::context(std::fs::read_to_string(&path), &path)?
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string)
                .collect()
        } else {
            Vec::new()
        };
        Ok(IgnoreMatcher::new(&user_patterns)?)
    }

    fn head_path(&self) -> PathBuf {
        self.wild_dir.join("HEAD")
    }

    fn logs_path(&self) -> PathBuf {
        self.wild_dir.join("logs")
    }

    fn config_path(&self) -> PathBuf {
        self.wild_dir.join("config")
    }

    fn origin_head_path(&self) -> PathBuf {
        self.wild_dir.join("remotes").join("origin").join("HEAD")
    }

    fn origin_logs_path(&self) -> PathBuf {
        self.wild_dir.join("remotes").join("origin").join("logs")
    }

    fn origin_config_path(&self) -> PathBuf {
        self.wild_dir.join("remotes").join("origin").join("config")
    }

    pub fn config(&self) -> Result<Config, RepoError> {
        Ok(Config::load(&self.config_path())?)
    }

    /// Overwrites `.wild/config` so `remote_config` (always named `origin`)
    /// becomes `core.remote`. Used to point an already-initialized
    /// repository at a remote after the fact, as opposed to [`Self::clone_from`]
    /// which sets this up as part of cloning.
    pub fn track_remote(&self, remote_config: RemoteConfig) -> Result<(), RepoError> {
        let config_text = render_origin_config(&remote_config);
        let config_path = self.config_path();
        file_util::IoResultExt::context(std::fs::write(&config_path, &config_text), &config_path)?;
        Ok(())
    }

    /// The commit `HEAD` currently points at, or `None` for an empty
    /// repository.
    pub fn head(&self) -> Result<Option<CommitId>, RepoError> {
        Ok(head::read(&self.head_path())?)
    }

    fn load_signer(&self) -> Result<Option<RequestSigner>, RepoError> {
        let path = self.wild_dir.join("secrets");
        if !path.exists() {
            return Ok(None);
        }
        let text = file_util::IoResultExt::context(std::fs::read_to_string(&path), &path)?;
        let bytes = hex_util::decode_hex(text.trim()).ok_or(RepoError::MissingPrivateKey)?;
        Ok(Some(RequestSigner::from_bytes(&bytes)?))
    }

    fn open_remote(&self, remote_config: &RemoteConfig) -> Result<Box<dyn Remote>, RepoError> {
        match remote_config.kind {
            RemoteKind::Disk => {
                let path = remote_config.require("path")?;
                Ok(Box::new(DiskRemote::new(path)))
            }
            RemoteKind::Wild => {
                let url = remote_config.require("url")?;
                let signer = if remote_config.get("sign") == Some("true") {
                    self.load_signer()?
                } else {
                    None
                };
                Ok(Box::new(HttpRemote::new(url, signer)))
            }
            RemoteKind::S3 => {
                let bucket = remote_config.require("bucket")?;
                let region = remote_config.require("region")?;
                let access_key_id = remote_config.require("access_key_id")?;
                let secret_access_key = remote_config.require("secret_access_key")?;
                Ok(Box::new(S3Remote::new(bucket, region, access_key_id, secret_access_key)))
            }
        }
    }

    fn tracked_remote_config(&self) -> Result<RemoteConfig, RepoError> {
        Ok(self
            .config()?
            .tracked_remote()
            .ok_or(RepoError::MissingRemote)?
            .clone())
    }

    /// Forces `path` to hold exactly `content` on `remote`, regardless of
    /// whether something was already stored there. `Remote::put` only
    /// guarantees creation (it's free to no-op on an existing path, since
    /// every other caller only ever writes content-addressed data); HEAD,
    /// the log, and the config are the one case that's actually mutable, so
    /// they go through a delete-then-put instead of a bare put.
    async fn force_put(remote: &dyn Remote, path: &str, content: &[u8]) -> Result<(), RemoteError> {
        remote.delete(path).await?;
        remote.put(path, content).await
    }

    // -- commit -----------------------------------------------------------

    /// Scans the working directory, diffs it against `HEAD`'s tree, stores
    /// any new blobs, rebuilds the tree incrementally, and appends a new
    /// commit as the new `HEAD`.
    pub async fn commit(&self, message: &str) -> Result<CommitId, RepoError> {
        self.commit_at(message, Utc::now()).await
    }

    #[tracing::instrument(skip(self, message))]
    pub async fn commit_at(&self, message: &str, now: DateTime<Utc>) -> Result<CommitId, RepoError> {
        let head_path = self.head_path();
        let parent = head::read(&head_path)?;
        let previous_tree = match &parent {
            Some(id) => Some(self.store.read_commit(id).await?.tree),
            None => None,
        };
        let previous_map = match &previous_tree {
            Some(id) => tree_ops::flatten_tree(&self.store, id).await?,
            None => tree_ops::FileMap::new(),
        };

        let scanned = scan::scan_working_dir(&self.base, &self.ignore)?;
        let changes = scan::diff_against_tree(&scanned, &previous_map);
        self.notify(RepoEvent::ScanComplete { changed: changes.len() });

        for change in &changes {
            if matches!(change.state, ChangeState::Deleted) {
                continue;
            }
            let disk_path = change.path.to_fs_path(&self.base);
            let content = file_util::IoResultExt::context(std::fs::read(&disk_path), &disk_path)?;
            self.store.store_blob(&Blob::new(content)).await?;
            self.notify(RepoEvent::BlobStored { path: change.path.clone() });
        }

        let tree_id = tree_rebuild::rebuild_tree(&self.store, &self.base, &self.ignore, &changes, previous_tree.as_ref()).await?;
        self.notify(RepoEvent::TreeRebuilt { hash: tree_id.clone() });

        let commit = Commit {
            tree: tree_id,
            parent: parent.clone(),
            message: message.to_string(),
            timestamp: now,
        };
        let commit_id = self.store.store_commit(&commit).await?;
        head::write(&head_path, Some(&commit_id), now)?;
        changelog::append(
            &self.logs_path(),
            &LogEntry {
                timestamp: now,
                hash: commit_id.clone(),
                parent,
                message: message.to_string(),
            },
        )?;
        self.notify(RepoEvent::CommitCreated { hash: commit_id.clone() });
        tracing::info!(commit = %commit_id, "committed");
        Ok(commit_id)
    }

    /// A read-only scan/diff against `HEAD`'s tree, without writing anything.
    pub async fn status(&self) -> Result<Vec<FileRef>, RepoError> {
        let parent = head::read(&self.head_path())?;
        let previous_map = match &parent {
            Some(id) => {
                let commit = self.store.read_commit(id).await?;
                tree_ops::flatten_tree(&self.store, &commit.tree).await?
            }
            None => tree_ops::FileMap::new(),
        };
        let scanned = scan::scan_working_dir(&self.base, &self.ignore)?;
        Ok(scan::diff_against_tree(&scanned, &previous_map))
    }

    // -- checkout -----------------------------------------------------------

    /// Replaces the working directory's contents with `commit_id`'s tree,
    /// preserving `.wild/`, then updates `HEAD`.
    pub async fn checkout(&self, commit_id: &CommitId) -> Result<(), RepoError> {
        self.checkout_with_fallback(commit_id, None).await
    }

    /// Like [`Self::checkout`], but blobs missing from the local store are
    /// pulled from `fallback` on demand -- the path an optimistic clone's
    /// working-directory materialization takes, since it may have skipped
    /// blobs entirely.
    #[tracing::instrument(skip(self, fallback))]
    pub async fn checkout_with_fallback(
        &self,
        commit_id: &CommitId,
        fallback: Option<&ObjectStore<Box<dyn Remote>>>,
    ) -> Result<(), RepoError> {
        self.notify(RepoEvent::CheckoutStarted { hash: commit_id.clone() });
        let commit = self.store.read_commit(commit_id).await?;
        self.clear_working_dir()?;
        self.materialize_tree(&commit.tree, &self.base, &RepoPathBuf::root(), fallback).await?;
        head::write(&self.head_path(), Some(commit_id), Utc::now())?;
        tracing::info!(commit = %commit_id, "checked out");
        Ok(())
    }

    fn clear_working_dir(&self) -> Result<(), RepoError> {
        if !self.base.exists() {
            return Ok(());
        }
        for entry in file_util::IoResultExt::context(std::fs::read_dir(&self.base), &self.base)? {
            let entry = entry?;
            if entry.file_name() == ".wild" {
                continue;
            }
            let path = entry.path();
            let file_type = file_util::IoResultExt::context(entry.file_type(), &path)?;
            if file_type.is_dir() {
                file_util::IoResultExt::context(std::fs::remove_dir_all(&path), &path)?;
            } else {
                file_util::IoResultExt::context(std::fs::remove_file(&path), &path)?;
            }
        }
        Ok(())
    }

    fn materialize_tree<'a>(
        &'a self,
        tree_id: &'a TreeId,
        disk_dir: &'a Path,
        repo_dir: &'a RepoPathBuf,
        fallback: Option<&'a ObjectStore<Box<dyn Remote>>>,
    ) -> Pin<Box<dyn Future<Output = Result<(), RepoError>> + Send + 'a>> {
        Box::pin(async move {
            let tree = match self.store.read_tree(tree_id).await {
                Ok(tree) => tree,
                Err(StoreError::NotFound { .. }) if fallback.is_some() => {
                    let fallback = fallback.unwrap();
                    fallback.copy_object_to(ObjectKind::Tree, &tree_id.hex(), &self.store).await?;
                    self.store.read_tree(tree_id).await?
                }
                Err(e) => return Err(e.into()),
            };
            std::fs::create_dir_all(disk_dir)?;
            for entry in tree.entries() {
                let path = disk_dir.join(entry.name.as_str());
                let repo_path = repo_dir.join(&entry.name);
                if let Some(child_id) = entry.tree_id() {
                    self.materialize_tree(&child_id, &path, &repo_path, fallback).await?;
                    continue;
                }
                let blob_id = entry.blob_id().expect("non-directory entry always has a blob hash");
                let blob = match self.store.read_blob(&blob_id).await {
                    Ok(blob) => blob,
                    Err(StoreError::NotFound { .. }) if fallback.is_some() => {
                        let fallback = fallback.unwrap();
                        fallback.copy_object_to(ObjectKind::Blob, &blob_id.hex(), &self.store).await?;
                        self.store.read_blob(&blob_id).await?
                    }
                    Err(e) => return Err(e.into()),
                };
                file_util::IoResultExt::context(std::fs::write(&path, &blob.content), &path)?;
                #[cfg(unix)]
                if matches!(entry.mode, Mode::Executable) {
                    use std::os::unix::fs::PermissionsExt as _;
                    let metadata = file_util::IoResultExt::context(std::fs::metadata(&path), &path)?;
                    let mut perms = metadata.permissions();
                    perms.set_mode(perms.mode() | 0o111);
                    file_util::IoResultExt::context(std::fs::set_permissions(&path, perms), &path)?;
                }
                self.notify(RepoEvent::FileMaterialized { path: repo_path });
            }
            Ok(())
        })
    }

    // -- fetch / push / rebase --------------------------------------------

    /// Copies the tracked remote's config, `HEAD`, reachable objects, and
    /// log into local tracking slots under `.wild/remotes/origin/`. Never
    /// touches the local `HEAD`.
    #[tracing::instrument(skip(self))]
    pub async fn fetch(&self) -> Result<(), RepoError> {
        let remote_config = self.tracked_remote_config()?;
        let remote = self.open_remote(&remote_config)?;
        let remote_store = ObjectStore::new(remote);

        if let Ok(config_bytes) = remote_store.remote().get("config").await {
            let path = self.origin_config_path();
            file_util::IoResultExt::context(std::fs::write(&path, &config_bytes), &path)?;
        }

        let head_bytes = remote_store.remote().get("HEAD").await?;
        let origin_head_path = self.origin_head_path();
        file_util::IoResultExt::context(std::fs::write(&origin_head_path, &head_bytes), &origin_head_path)?;
        let remote_head = head::read(&origin_head_path)?;

        if let Some(remote_head_id) = &remote_head {
            let reachable = remote_store.reachable_objects(remote_head_id).await?;
            let mut missing = Vec::new();
            for (kind, hash) in reachable {
                if !self.store.exists(kind, &hash).await? {
                    missing.push((kind, hash));
                }
            }
            let fetched: Vec<(ObjectKind, String)> = futures::stream::iter(missing)
                .map(|(kind, hash)| {
                    let remote_store = &remote_store;
                    async move {
                        remote_store.copy_object_to(kind, &hash, &self.store).await?;
                        Ok::<_, StoreError>((kind, hash))
                    }
                })
                .buffer_unordered(remote::MAX_PARALLEL_UPLOADS)
                .try_collect()
                .await?;
            for (kind, hash) in &fetched {
                self.notify(RepoEvent::FetchedObject { kind: *kind, hash: hash.clone() });
            }
            tracing::debug!(fetched = fetched.len(), "fetch transferred objects");
        }

        if let Ok(logs_bytes) = remote_store.remote().get("logs").await {
            let path = self.origin_logs_path();
            file_util::IoResultExt::context(std::fs::write(&path, &logs_bytes), &path)?;
        }

        Ok(())
    }

    /// Uploads every object reachable from the local `HEAD` that the remote
    /// doesn't already have, then advances the remote's `HEAD` (and its log
    /// and config) only after every object has landed.
    #[tracing::instrument(skip(self))]
    pub async fn push(&self) -> Result<(), RepoError> {
        let local_head = head::read(&self.head_path())?.ok_or(RepoError::MissingHead)?;

        let remote_config = self.tracked_remote_config()?;
        let remote = self.open_remote(&remote_config)?;
        let remote_store = ObjectStore::new(remote);

        let local_reach = self.store.reachable_objects(&local_head).await?;

        let remote_head_bytes = match remote_store.remote().get("HEAD").await {
            Ok(bytes) => Some(bytes),
            Err(RemoteError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        let remote_head = match &remote_head_bytes {
            Some(bytes) => {
                let text = std::str::from_utf8(bytes).map_err(|_| RepoError::MissingRemote)?;
                head::parse(text)?
            }
            None => None,
        };
        let remote_reach = match &remote_head {
            Some(id) => remote_store.reachable_objects(id).await?,
            None => HashSet::new(),
        };

        let to_push: Vec<(ObjectKind, String)> =
            local_reach.difference(&remote_reach).cloned().collect();
        let pushed: Vec<(ObjectKind, String)> = futures::stream::iter(to_push)
            .map(|(kind, hash)| {
                let remote_store = &remote_store;
                async move {
                    self.store.copy_object_to(kind, &hash, remote_store).await?;
                    Ok::<_, StoreError>((kind, hash))
                }
            })
            .buffer_unordered(remote::MAX_PARALLEL_UPLOADS)
            .try_collect()
            .await?;
        for (kind, hash) in &pushed {
            self.notify(RepoEvent::PushedObject { kind: *kind, hash: hash.clone() });
        }
        tracing::debug!(pushed = pushed.len(), "push transferred objects");

        let now = Utc::now();
        Self::force_put(remote_store.remote(), "HEAD", head::render(Some(&local_head), now).as_bytes())
            .await?;

        let local_logs = file_util::IoResultExt::context(std::fs::read(self.logs_path()), &self.logs_path())?;
        Self::force_put(remote_store.remote(), "logs", &local_logs).await?;
        let local_config = file_util::IoResultExt::context(std::fs::read(self.config_path()), &self.config_path())?;
        Self::force_put(remote_store.remote(), "config", &local_config).await?;

        tracing::info!(head = %local_head, "pushed");
        Ok(())
    }

    /// Fetches, then replays every local-only commit (oldest first) onto the
    /// remote's `HEAD`, preserving each commit's message and timestamp, and
    /// finally checks out the result.
    #[tracing::instrument(skip(self))]
    pub async fn rebase(&self) -> Result<(), RepoError> {
        self.fetch().await?;

        let head_path = self.head_path();
        let local_head = head::read(&head_path)?;
        let remote_head = head::read(&self.origin_head_path())?;

        if local_head == remote_head {
            return Ok(());
        }
        let Some(remote_head_id) = remote_head else {
            return Err(RepoError::MissingCommonAncestor);
        };

        if local_head.is_none() {
            head::write(&head_path, Some(&remote_head_id), Utc::now())?;
            self.checkout(&remote_head_id).await?;
            return Ok(());
        }

        let remote_ancestors: HashSet<CommitId> =
            self.store.reachable_commits(&remote_head_id).await?.into_iter().collect();

        let mut local_chain = Vec::new();
        let mut cursor = local_head;
        let mut found_common = false;
        while let Some(id) = cursor {
            if remote_ancestors.contains(&id) {
                found_common = true;
                break;
            }
            let commit = self.store.read_commit(&id).await?;
            local_chain.push(id);
            cursor = commit.parent;
        }
        if !found_common {
            return Err(RepoError::MissingCommonAncestor);
        }
        local_chain.reverse();

        let mut current = remote_head_id;
        let mut running_map = tree_ops::flatten_tree(&self.store, &self.store.read_commit(&current).await?.tree).await?;

        for local_commit_id in &local_chain {
            let local_commit = self.store.read_commit(local_commit_id).await?;
            let parent_map = match &local_commit.parent {
                Some(parent_id) => {
                    let parent_commit = self.store.read_commit(parent_id).await?;
                    tree_ops::flatten_tree(&self.store, &parent_commit.tree).await?
                }
                None => tree_ops::FileMap::new(),
            };
            let commit_map = tree_ops::flatten_tree(&self.store, &local_commit.tree).await?;
            let (changed, deleted) = diff_file_maps(&parent_map, &commit_map);
            for (path, mode, hash) in changed {
                running_map.insert(path, (mode, hash));
            }
            for path in deleted {
                running_map.remove(&path);
            }

            let new_tree = tree_ops::build_tree_from_map(&self.store, &running_map).await?;
            let new_commit = Commit {
                tree: new_tree,
                parent: Some(current.clone()),
                message: local_commit.message.clone(),
                timestamp: local_commit.timestamp,
            };
            let new_id = self.store.store_commit(&new_commit).await?;
            changelog::append(
                &self.logs_path(),
                &LogEntry {
                    timestamp: local_commit.timestamp,
                    hash: new_id.clone(),
                    parent: Some(current.clone()),
                    message: local_commit.message.clone(),
                },
            )?;
            self.notify(RepoEvent::RebaseReplayed {
                original: local_commit_id.clone(),
                replayed: new_id.clone(),
            });
            current = new_id;
        }

        head::write(&head_path, Some(&current), Utc::now())?;
        self.checkout(&current).await?;
        Ok(())
    }

    // -- clone --------------------------------------------------------------

    /// Clones `remote_config` (always tracked as `origin`) into a fresh
    /// repository at `base`. With `optimistic`, blobs are skipped during the
    /// object copy and fetched lazily during checkout instead; with `bare`,
    /// no working directory is materialized at all.
    #[tracing::instrument(skip(base, remote_config))]
    pub async fn clone_from(
        base: &Path,
        remote_config: RemoteConfig,
        bare: bool,
        optimistic: bool,
    ) -> Result<Self, RepoError> {
        let repo = Self::init(base)?;

        let config_text = render_origin_config(&remote_config);
        let config_path = repo.config_path();
        file_util::IoResultExt::context(std::fs::write(&config_path, &config_text), &config_path)?;

        let remote = repo.open_remote(&remote_config)?;
        let remote_store = ObjectStore::new(remote);

        let head_bytes = match remote_store.remote().get("HEAD").await {
            Ok(bytes) => bytes,
            Err(RemoteError::NotFound { .. }) => return Err(RepoError::MissingHead),
            Err(e) => return Err(e.into()),
        };
        let head_path = repo.head_path();
        file_util::IoResultExt::context(std::fs::write(&head_path, &head_bytes), &head_path)?;
        let origin_head_path = repo.origin_head_path();
        file_util::IoResultExt::context(std::fs::write(&origin_head_path, &head_bytes), &origin_head_path)?;
        let head_commit = head::read(&head_path)?.ok_or(RepoError::MissingHead)?;

        if let Ok(logs_bytes) = remote_store.remote().get("logs").await {
            let logs_path = repo.logs_path();
            file_util::IoResultExt::context(std::fs::write(&logs_path, &logs_bytes), &logs_path)?;
            let origin_logs_path = repo.origin_logs_path();
            file_util::IoResultExt::context(std::fs::write(&origin_logs_path, &logs_bytes), &origin_logs_path)?;
        }
        if let Ok(secrets_bytes) = remote_store.remote().get("secrets").await {
            let path = repo.wild_dir.join("secrets");
            file_util::IoResultExt::context(std::fs::write(&path, &secrets_bytes), &path)?;
        }

        let reachable = remote_store.reachable_objects(&head_commit).await?;
        let to_copy: Vec<(ObjectKind, String)> = reachable
            .into_iter()
            .filter(|(kind, _)| !(optimistic && *kind == ObjectKind::Blob))
            .collect();
        let copied: Vec<(ObjectKind, String)> = futures::stream::iter(to_copy)
            .map(|(kind, hash)| {
                let remote_store = &remote_store;
                let repo = &repo;
                async move {
                    remote_store.copy_object_to(kind, &hash, &repo.store).await?;
                    Ok::<_, StoreError>((kind, hash))
                }
            })
            .buffer_unordered(remote::MAX_PARALLEL_UPLOADS)
            .try_collect()
            .await?;
        for (kind, hash) in copied {
            repo.notify(RepoEvent::FetchedObject { kind, hash });
        }

        if !bare {
            let fallback = optimistic.then_some(&remote_store);
            repo.checkout_with_fallback(&head_commit, fallback).await?;
        }

        Ok(repo)
    }
}

/// Renders a minimal `.wild/config` that names `remote_config` as
/// `core.remote` under the fixed name `origin`.
fn render_origin_config(remote_config: &RemoteConfig) -> String {
    let kind = match remote_config.kind {
        RemoteKind::Disk => "disk",
        RemoteKind::Wild => "wild",
        RemoteKind::S3 => "s3",
    };
    let mut text = format!("[core]\nremote = origin\n\n[remote:origin]\nkind = {kind}\n");
    for (key, value) in &remote_config.keys {
        if key == "kind" {
            continue;
        }
        text.push_str(&format!("{key} = {value}\n"));
    }
    text
}

/// Diffs two flattened file maps by hash, the same way [`scan::diff_against_tree`]
/// diffs a scan against a tree, but for two historical snapshots instead of a
/// live working directory. Used by [`Repository::rebase`] to replay a
/// commit's changes onto a different parent.
fn diff_file_maps(
    old: &tree_ops::FileMap,
    new: &tree_ops::FileMap,
) -> (Vec<(RepoPathBuf, Mode, String)>, Vec<RepoPathBuf>) {
    let mut changed = Vec::new();
    for (path, (mode, hash)) in new {
        match old.get(path) {
            Some((_, old_hash)) if old_hash == hash => {}
            _ => changed.push((path.clone(), *mode, hash.clone())),
        }
    }
    let deleted = old.keys().filter(|path| !new.contains_key(*path)).cloned().collect();
    (changed, deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[tokio::test]
    async fn test_init_creates_empty_repository() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        assert_eq!(repo.head().unwrap(), None);
    }

    #[tokio::test]
    async fn test_commit_then_status_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.txt", "hello");
        let repo = Repository::init(dir.path()).unwrap();
        let first = repo.commit("add a.txt").await.unwrap();
        assert_eq!(repo.head().unwrap(), Some(first));
        let status = repo.status().await.unwrap();
        assert!(status.is_empty());
    }

    #[tokio::test]
    async fn test_commit_twice_tracks_changes() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.txt", "v1");
        let repo = Repository::init(dir.path()).unwrap();
        let first = repo.commit("v1").await.unwrap();

        write_file(dir.path(), "a.txt", "v2");
        let second = repo.commit("v2").await.unwrap();
        assert_ne!(first, second);

        let second_commit = repo.store.read_commit(&second).await.unwrap();
        assert_eq!(second_commit.parent, Some(first));
    }

    #[tokio::test]
    async fn test_checkout_restores_files_and_removes_extras() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.txt", "hello");
        let repo = Repository::init(dir.path()).unwrap();
        let first = repo.commit("add a.txt").await.unwrap();

        write_file(dir.path(), "b.txt", "stray");
        repo.checkout(&first).await.unwrap();

        assert!(dir.path().join("a.txt").exists());
        assert!(!dir.path().join("b.txt").exists());
        assert!(dir.path().join(".wild").is_dir());
    }

    #[tokio::test]
    async fn test_clone_from_rejects_misconfigured_remote() {
        // S3Remote::new happily builds with any strings, so a misconfigured
        // remote only surfaces once `require` looks for a key that was never
        // set -- this is the path that exercises that without a live server.
        let remote_config = RemoteConfig {
            name: "origin".to_string(),
            kind: RemoteKind::S3,
            keys: HashMap::new(),
        };
        let dest_dir = tempfile::tempdir().unwrap();
        let result = Repository::clone_from(dest_dir.path(), remote_config, false, false).await;
        assert!(matches!(result, Err(RepoError::Config(ConfigError::MissingKey { .. }))));
    }

    #[tokio::test]
    async fn test_rebase_with_no_local_head_fast_forwards() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        // No tracked remote is configured, so rebase must fail on
        // MissingRemote rather than panicking on an absent config.
        let result = repo.rebase().await;
        assert!(matches!(result, Err(RepoError::MissingRemote)));
    }

    #[tokio::test]
    async fn test_push_without_commit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let result = repo.push().await;
        assert!(matches!(result, Err(RepoError::MissingHead)));
    }

    #[tokio::test]
    async fn test_push_then_clone_over_disk_remote() {
        let remote_dir = tempfile::tempdir().unwrap();
        let remote_config = RemoteConfig {
            name: "origin".to_string(),
            kind: RemoteKind::Disk,
            keys: HashMap::from([("path".to_string(), remote_dir.path().to_string_lossy().into_owned())]),
        };

        let source_dir = tempfile::tempdir().unwrap();
        write_file(source_dir.path(), "a.txt", "hello");
        let source = Repository::init(source_dir.path()).unwrap();
        source.commit("add a.txt").await.unwrap();
        source.track_remote(remote_config.clone()).unwrap();
        source.push().await.unwrap();

        let dest_dir = tempfile::tempdir().unwrap();
        let dest = Repository::clone_from(dest_dir.path(), remote_config, false, false).await.unwrap();
        assert_eq!(dest.head().unwrap(), source.head().unwrap());
        assert_eq!(std::fs::read_to_string(dest_dir.path().join("a.txt")).unwrap(), "hello");
    }
}
