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

//! The incremental tree rebuild `commit` uses: only the directories that lie
//! on the path to a changed file are re-hashed, every other subtree is
//! reused verbatim from the parent commit's tree.
//!
//! This is the one place the engine needs both the working copy on disk and
//! the previous tree's shape at once, which is why it lives apart from the
//! pure, in-memory [`crate::tree_ops::build_tree_from_map`] rebase uses.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fs::DirEntry;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use thiserror::Error;

use crate::file_util;
use crate::file_util::PathError;
use crate::object_id::BlobId;
use crate::object_id::ObjectId as _;
use crate::object_id::TreeId;
use crate::object_store::ObjectStore;
use crate::object_store::StoreError;
use crate::objects::Mode;
use crate::objects::Tree;
use crate::objects::TreeEntry;
use crate::remote::Remote;
use crate::repo_path::InvalidRepoPathComponent;
use crate::repo_path::RepoPathBuf;
use crate::scan;
use crate::scan::ChangeState;
use crate::scan::FileRef;

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    InvalidName(#[from] InvalidRepoPathComponent),
    #[error("directory {0} is marked unchanged but has no cached entry in the parent tree")]
    MissingCacheEntry(RepoPathBuf),
}

/// Recursively loads every subtree of `root` into a `dir -> (Tree, TreeId)`
/// cache, so the rebuild below can look up "what did this directory look
/// like last commit" without re-fetching it from the store more than once.
async fn load_tree_cache<R: Remote>(
    store: &ObjectStore<R>,
    dir: RepoPathBuf,
    tree_id: TreeId,
    cache: &mut HashMap<RepoPathBuf, (Tree, TreeId)>,
) -> Result<(), RebuildError> {
    let tree = store.read_tree(&tree_id).await?;
    let mut children = Vec::new();
    for entry in tree.entries() {
        if let Some(child_id) = entry.tree_id() {
            children.push((dir.join(&entry.name), child_id));
        }
    }
    cache.insert(dir, (tree, tree_id));
    for (child_dir, child_id) in children {
        Box::pin(load_tree_cache(store, child_dir, child_id, cache)).await?;
    }
    Ok(())
}

struct RebuildCtx<'a, R: Remote> {
    store: &'a ObjectStore<R>,
    disk_base: &'a Path,
    ignore: &'a crate::ignore::IgnoreMatcher,
    changed_dirs: &'a HashSet<RepoPathBuf>,
    previous: &'a HashMap<RepoPathBuf, (Tree, TreeId)>,
    changed_blobs: &'a HashMap<RepoPathBuf, BlobId>,
}

impl<R: Remote + Sync> RebuildCtx<'_, R> {
    fn build<'b>(&'b self, dir: RepoPathBuf) -> Pin<Box<dyn Future<Output = Result<TreeId, RebuildError>> + Send + 'b>>
    where
        R: Send,
    {
        Box::pin(async move {
            if !self.changed_dirs.contains(&dir) {
                let (_, id) = self
                    .previous
                    .get(&dir)
                    .ok_or_else(|| RebuildError::MissingCacheEntry(dir.clone()))?;
                return Ok(id.clone());
            }

            let disk_dir = dir.to_fs_path(self.disk_base);
            let mut dir_entries: Vec<DirEntry> = Vec::new();
            if disk_dir.is_dir() {
                let mut entries = file_util::IoResultExt::context(std::fs::read_dir(&disk_dir), &disk_dir)?
                    .collect::<std::io::Result<Vec<_>>>()
                    .map_err(|source| PathError {
                        path: disk_dir.clone(),
                        source,
                    })?;
                entries.sort_by_key(DirEntry::file_name);
                dir_entries = entries;
            }

            let mut tree_entries = Vec::new();
            for entry in dir_entries {
                let name = entry.file_name().to_string_lossy().into_owned();
                if scan::is_control_dir(&dir, &name) {
                    continue;
                }
                let child_path = dir.join_str(name.clone())?;
                let rel = child_path.as_internal_string();
                if self.ignore.is_ignored(&rel) {
                    continue;
                }
                let file_type = file_util::IoResultExt::context(entry.file_type(), &disk_dir)?;
                let name = crate::repo_path::RepoPathComponentBuf::new(name)?;

                if file_type.is_dir() {
                    let child_id = self.build(child_path.clone()).await?;
                    tree_entries.push(TreeEntry {
                        name,
                        mode: Mode::Directory,
                        hash: child_id.hex(),
                    });
                } else if let Some(blob_id) = self.changed_blobs.get(&child_path) {
                    let mode = scan::detect_mode(&entry.path(), &file_type)?;
                    tree_entries.push(TreeEntry {
                        name,
                        mode,
                        hash: blob_id.hex(),
                    });
                } else {
                    let (previous_tree, _) = self
                        .previous
                        .get(&dir)
                        .ok_or_else(|| RebuildError::MissingCacheEntry(dir.clone()))?;
                    let reused = previous_tree
                        .entry(name.as_str())
                        .ok_or_else(|| RebuildError::MissingCacheEntry(child_path.clone()))?;
                    tree_entries.push(reused.clone());
                }
            }

            let tree = Tree::from_entries(tree_entries);
            let id = self.store.store_tree(&tree).await?;
            Ok(id)
        })
    }
}

/// Rebuilds the working copy's tree, reusing every subtree that lies
/// outside the set of directories touched by `changes`.
///
/// `previous_root` is the parent commit's tree, or `None` for a repository's
/// first commit (in which case every directory is rebuilt from scratch).
pub async fn rebuild_tree<R: Remote + Sync + Send>(
    store: &ObjectStore<R>,
    disk_base: &Path,
    ignore: &crate::ignore::IgnoreMatcher,
    changes: &[FileRef],
    previous_root: Option<&TreeId>,
) -> Result<TreeId, RebuildError> {
    let mut changed_dirs: HashSet<RepoPathBuf> = HashSet::new();
    changed_dirs.insert(RepoPathBuf::root());
    for change in changes {
        for ancestor in change.path.ancestors() {
            changed_dirs.insert(ancestor);
        }
    }

    let mut previous = HashMap::new();
    if let Some(root_id) = previous_root {
        load_tree_cache(store, RepoPathBuf::root(), root_id.clone(), &mut previous).await?;
    }

    // `split_changes` also reports the deleted paths, but a tree rebuild
    // never needs them: a deleted file is simply absent from the disk walk
    // `RebuildCtx::build` performs, so there's nothing to subtract.
    let (changed_blobs, _deleted) = scan::split_changes(changes);
    let changed_blobs: HashMap<RepoPathBuf, BlobId> = changed_blobs.into_iter().collect();

    let ctx = RebuildCtx {
        store,
        disk_base,
        ignore,
        changed_dirs: &changed_dirs,
        previous: &previous,
        changed_blobs: &changed_blobs,
    };
    ctx.build(RepoPathBuf::root()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Blob;
    use crate::remote::test_support::MemoryRemote;
    use crate::scan::diff_against_tree;
    use crate::scan::scan_working_dir;
    use crate::tree_ops::flatten_tree;

    async fn commit_all(store: &ObjectStore<MemoryRemote>, dir: &Path, previous: Option<&TreeId>) -> TreeId {
        let ignore = crate::ignore::IgnoreMatcher::new(&[]).unwrap();
        let scanned = scan_working_dir(dir, &ignore).unwrap();
        let previous_map = if let Some(id) = previous {
            flatten_tree(store, id).await.unwrap()
        } else {
            Default::default()
        };
        let changes = diff_against_tree(&scanned, &previous_map);
        for change in &changes {
            if let Some(hash) = &change.hash {
                if !matches!(change.state, ChangeState::Deleted) {
                    let content = std::fs::read(change.path.to_fs_path(dir)).unwrap();
                    let stored = store.store_blob(&Blob::new(content)).await.unwrap();
                    assert_eq!(&stored, hash);
                }
            }
        }
        rebuild_tree(store, dir, &ignore, &changes, previous).await.unwrap()
    }

    #[tokio::test]
    async fn test_unchanged_subtree_is_reused_byte_for_byte() {
        let store = ObjectStore::new(MemoryRemote::default());
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("unchanged")).unwrap();
        std::fs::write(dir.path().join("unchanged").join("x.txt"), "same").unwrap();
        std::fs::write(dir.path().join("top.txt"), "v1").unwrap();
        let root1 = commit_all(&store, dir.path(), None).await;

        std::fs::write(dir.path().join("top.txt"), "v2").unwrap();
        let root2 = commit_all(&store, dir.path(), Some(&root1)).await;

        let tree1 = store.read_tree(&root1).await.unwrap();
        let tree2 = store.read_tree(&root2).await.unwrap();
        assert_eq!(tree1.entry("unchanged"), tree2.entry("unchanged"));
        assert_ne!(tree1.entry("top.txt"), tree2.entry("top.txt"));
    }

    #[tokio::test]
    async fn test_full_roundtrip_flattens_back_to_same_files() {
        let store = ObjectStore::new(MemoryRemote::default());
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/c.txt"), "hello").unwrap();
        std::fs::write(dir.path().join("root.txt"), "world").unwrap();
        let root = commit_all(&store, dir.path(), None).await;
        let flat = flatten_tree(&store, &root).await.unwrap();
        assert_eq!(flat.len(), 2);
        assert!(flat.contains_key(&RepoPathBuf::from_internal_string("a/b/c.txt").unwrap()));
        assert!(flat.contains_key(&RepoPathBuf::from_internal_string("root.txt").unwrap()));
    }
}
