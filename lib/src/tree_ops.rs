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

//! Flattening a tree object into a flat path map, and the reverse:
//! regrouping a flat map back into a hierarchy of tree objects.
//!
//! `flatten_tree` is shared by the scanner (diffing a parent commit's tree
//! against a fresh scan) and by rebase (diffing two historical trees).
//! `build_tree_from_map` is the inverse used by rebase, which replays a
//! sequence of flat-map diffs and has no on-disk working copy to read
//! unchanged subtrees back from, so it always rebuilds bottom-up instead of
//! reusing stored subtrees.

use std::collections::BTreeMap;

use crate::object_id::ObjectId as _;
use crate::object_id::TreeId;
use crate::object_store::ObjectStore;
use crate::object_store::StoreError;
use crate::objects::Mode;
use crate::objects::Tree;
use crate::objects::TreeEntry;
use crate::remote::Remote;
use crate::repo_path::RepoPathBuf;
use crate::repo_path::RepoPathComponentBuf;

/// Every regular file under a tree, keyed by its full repo-relative path,
/// recording the mode and hex hash it was stored under.
pub type FileMap = BTreeMap<RepoPathBuf, (Mode, String)>;

/// Recursively walks `tree_id`, collecting every non-directory entry into a
/// flat map.
pub async fn flatten_tree<R: Remote>(store: &ObjectStore<R>, tree_id: &TreeId) -> Result<FileMap, StoreError> {
    let mut out = BTreeMap::new();
    let mut stack = vec![(RepoPathBuf::root(), tree_id.clone())];
    while let Some((dir, id)) = stack.pop() {
        let tree = store.read_tree(&id).await?;
        for entry in tree.entries() {
            let path = dir.join(&entry.name);
            if let Some(child_tree) = entry.tree_id() {
                stack.push((path, child_tree));
            } else {
                out.insert(path, (entry.mode, entry.hash.clone()));
            }
        }
    }
    Ok(out)
}

/// Rebuilds a tree hierarchy purely in memory from a flat file map, storing
/// every directory bottom-up. Does not consult or reuse any previously
/// stored tree -- every directory that has at least one tracked descendant
/// is re-hashed, which is the right tradeoff for rebase (a handful of
/// replayed commits), but would be wasteful for `commit` against a large
/// working copy (see [`crate::tree_rebuild`] for that path instead).
pub async fn build_tree_from_map<R: Remote>(store: &ObjectStore<R>, files: &FileMap) -> Result<TreeId, StoreError> {
    let mut by_dir: BTreeMap<RepoPathBuf, Vec<(RepoPathComponentBuf, Mode, String)>> = BTreeMap::new();
    let mut all_dirs: std::collections::BTreeSet<RepoPathBuf> = std::collections::BTreeSet::new();
    all_dirs.insert(RepoPathBuf::root());
    for path in files.keys() {
        for ancestor in path.ancestors() {
            all_dirs.insert(ancestor);
        }
    }
    for (path, (mode, hash)) in files {
        let (parent, name) = path.split().expect("a file's path always has a parent");
        by_dir
            .entry(parent)
            .or_default()
            .push((name.clone(), *mode, hash.clone()));
    }

    // Deepest directories first, so a directory's children are already
    // hashed by the time the directory itself is built.
    let mut dirs: Vec<RepoPathBuf> = all_dirs.into_iter().collect();
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().len()));

    let mut subtrees: BTreeMap<RepoPathBuf, TreeId> = BTreeMap::new();
    for dir in &dirs {
        let mut entries: Vec<TreeEntry> = by_dir
            .get(dir)
            .into_iter()
            .flatten()
            .map(|(name, mode, hash)| TreeEntry {
                name: name.clone(),
                mode: *mode,
                hash: hash.clone(),
            })
            .collect();
        for child_dir in dirs.iter().filter(|d| d.parent().as_ref() == Some(dir)) {
            if let Some(child_id) = subtrees.get(child_dir) {
                let (_, name) = child_dir.split().expect("child directory always has a parent");
                entries.push(TreeEntry {
                    name: name.clone(),
                    mode: Mode::Directory,
                    hash: child_id.hex(),
                });
            }
        }
        let tree = Tree::from_entries(entries);
        let id = store.store_tree(&tree).await?;
        subtrees.insert(dir.clone(), id);
    }
    Ok(subtrees
        .get(&RepoPathBuf::root())
        .expect("root directory is always present")
        .clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::test_support::MemoryRemote;

    fn map(entries: &[(&str, &str)]) -> FileMap {
        entries
            .iter()
            .map(|(p, h)| (RepoPathBuf::from_internal_string(p).unwrap(), (Mode::Normal, h.to_string())))
            .collect()
    }

    #[tokio::test]
    async fn test_build_then_flatten_roundtrips() {
        let store = ObjectStore::new(MemoryRemote::default());
        let files = map(&[
            ("a.txt", &"1".repeat(64)),
            ("dir/b.txt", &"2".repeat(64)),
            ("dir/sub/c.txt", &"3".repeat(64)),
        ]);
        let root = build_tree_from_map(&store, &files).await.unwrap();
        let flattened = flatten_tree(&store, &root).await.unwrap();
        assert_eq!(flattened, files);
    }

    #[tokio::test]
    async fn test_empty_map_builds_empty_tree() {
        let store = ObjectStore::new(MemoryRemote::default());
        let root = build_tree_from_map(&store, &FileMap::new()).await.unwrap();
        let tree = store.read_tree(&root).await.unwrap();
        assert!(tree.is_empty());
    }
}
