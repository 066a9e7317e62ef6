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

//! The working-directory scanner and change detector.
//!
//! A scan walks every non-ignored regular file under the repository root,
//! hashing each one the same way a stored blob is addressed, and produces a
//! [`FileRef`] per file. Diffing those refs against the flattened tree of
//! HEAD's parent commit is what tells `commit` which blobs it actually needs
//! to write.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs::DirEntry;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

use crate::file_util;
use crate::file_util::PathError;
use crate::ignore::IgnoreMatcher;
use crate::object_id::BlobId;
use crate::object_id::ObjectId as _;
use crate::object_store;
use crate::objects::Mode;
use crate::repo_path::InvalidRepoPathComponent;
use crate::repo_path::RepoPathBuf;
use crate::tree_ops::FileMap;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    InvalidName(#[from] InvalidRepoPathComponent),
}

/// The `.wild/` control directory is never part of the tracked working
/// directory, regardless of what the repository's own ignore patterns say --
/// it would be self-referential to track the store that tracks everything
/// else.
pub fn is_control_dir(parent: &RepoPathBuf, name: &str) -> bool {
    parent.is_root() && name == ".wild"
}

/// One regular file found during a scan, already hashed.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: RepoPathBuf,
    pub mode: Mode,
    pub disk_path: PathBuf,
    pub hash: BlobId,
}

/// Walks `base`, skipping ignored paths and the control directory, hashing
/// every regular file it finds. Returned in sorted path order.
pub fn scan_working_dir(base: &Path, ignore: &IgnoreMatcher) -> Result<Vec<ScannedFile>, ScanError> {
    let mut out = Vec::new();
    visit_dir(base, base, &RepoPathBuf::root(), ignore, &mut out)?;
    out.sort_by(|a, b| a.path.as_internal_string().cmp(&b.path.as_internal_string()));
    Ok(out)
}

fn visit_dir(
    root: &Path,
    disk_dir: &Path,
    repo_dir: &RepoPathBuf,
    ignore: &IgnoreMatcher,
    out: &mut Vec<ScannedFile>,
) -> Result<(), ScanError> {
    let mut entries: Vec<DirEntry> = file_util::IoResultExt::context(std::fs::read_dir(disk_dir), disk_dir)?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|source| PathError { path: disk_dir.to_path_buf(), source })?;
    entries.sort_by_key(DirEntry::file_name);

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_control_dir(repo_dir, &name) {
            continue;
        }
        let child_repo_path = repo_dir.join_str(name)?;
        let rel = child_repo_path.as_internal_string();
        if ignore.is_ignored(&rel) {
            continue;
        }
        let file_type = file_util::IoResultExt::context(entry.file_type(), disk_dir)?;
        let disk_path = entry.path();
        if file_type.is_dir() {
            visit_dir(root, &disk_path, &child_repo_path, ignore, out)?;
        } else {
            let mode = detect_mode(&disk_path, &file_type)?;
            let hash = object_store::hash_file(&disk_path).map_err(|source| PathError {
                path: disk_path.clone(),
                source,
            })?;
            out.push(ScannedFile {
                path: child_repo_path,
                mode,
                disk_path,
                hash: BlobId::from_bytes(&hash),
            });
        }
    }
    Ok(())
}

/// Infers a tree entry mode from filesystem metadata: symlinks first (their
/// content is a path, not file bytes), then the executable bit on platforms
/// that have one, falling back to a plain regular file otherwise.
pub fn detect_mode(disk_path: &Path, file_type: &std::fs::FileType) -> Result<Mode, ScanError> {
    if file_type.is_symlink() {
        return Ok(Mode::Symlink);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let metadata = file_util::IoResultExt::context(std::fs::symlink_metadata(disk_path), disk_path)?;
        if metadata.permissions().mode() & 0o111 != 0 {
            return Ok(Mode::Executable);
        }
    }
    Ok(Mode::Normal)
}

/// The three ways a tracked path can differ between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeState {
    Added,
    Modified,
    Deleted,
}

/// A transient record of one file during a scan/diff. Never persisted --
/// see the data model's working file reference.
#[derive(Debug, Clone)]
pub struct FileRef {
    pub path: RepoPathBuf,
    pub hash: Option<BlobId>,
    pub previous_hash: Option<BlobId>,
    pub state: ChangeState,
    pub mode: Mode,
}

/// Compares freshly scanned files against the flattened contents of a
/// parent tree, by hash: present in both with differing hash is `Modified`,
/// present only in `scanned` is `Added`, present only in `previous` is
/// `Deleted`. Files present in both with the *same* hash are not changes and
/// are omitted.
pub fn diff_against_tree(scanned: &[ScannedFile], previous: &FileMap) -> Vec<FileRef> {
    let mut refs = Vec::new();
    let mut seen = BTreeSet::new();
    for file in scanned {
        seen.insert(file.path.clone());
        match previous.get(&file.path) {
            None => refs.push(FileRef {
                path: file.path.clone(),
                hash: Some(file.hash.clone()),
                previous_hash: None,
                state: ChangeState::Added,
                mode: file.mode,
            }),
            Some((_prev_mode, prev_hash)) => {
                if *prev_hash != file.hash.hex() {
                    refs.push(FileRef {
                        path: file.path.clone(),
                        hash: Some(file.hash.clone()),
                        previous_hash: BlobId::try_from_hex(prev_hash),
                        state: ChangeState::Modified,
                        mode: file.mode,
                    });
                }
            }
        }
    }
    let mut deleted: Vec<_> = previous
        .iter()
        .filter(|(path, _)| !seen.contains(*path))
        .map(|(path, (mode, hash))| FileRef {
            path: path.clone(),
            hash: None,
            previous_hash: BlobId::try_from_hex(hash),
            state: ChangeState::Deleted,
            mode: *mode,
        })
        .collect();
    refs.append(&mut deleted);
    refs
}

/// Splits a change set into the blobs a commit needs to store (added and
/// modified files, keyed by path) and the set of paths removed outright.
pub fn split_changes(changes: &[FileRef]) -> (BTreeMap<RepoPathBuf, BlobId>, BTreeSet<RepoPathBuf>) {
    let mut changed_blobs = BTreeMap::new();
    let mut deleted = BTreeSet::new();
    for change in changes {
        match change.state {
            ChangeState::Deleted => {
                deleted.insert(change.path.clone());
            }
            ChangeState::Added | ChangeState::Modified => {
                let hash = change
                    .hash
                    .clone()
                    .expect("added/modified FileRef always carries its new hash");
                changed_blobs.insert(change.path.clone(), hash);
            }
        }
    }
    (changed_blobs, deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_hashes_files_and_skips_control_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".wild")).unwrap();
        std::fs::write(dir.path().join(".wild").join("HEAD"), "junk").unwrap();
        std::fs::write(dir.path().join("foo.txt"), "hello").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("bar.txt"), "world").unwrap();

        let ignore = IgnoreMatcher::new(&[]).unwrap();
        let files = scan_working_dir(dir.path(), &ignore).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_internal_string()).collect();
        assert_eq!(paths, vec!["foo.txt", "sub/bar.txt"]);
    }

    #[test]
    fn test_scan_respects_ignore_patterns() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), "1").unwrap();
        std::fs::create_dir(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("target").join("drop.txt"), "2").unwrap();

        let ignore = IgnoreMatcher::new(&["target".to_string()]).unwrap();
        let files = scan_working_dir(dir.path(), &ignore).unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_internal_string()).collect();
        assert_eq!(paths, vec!["keep.txt"]);
    }

    fn file_map(entries: &[(&str, &str)]) -> FileMap {
        entries
            .iter()
            .map(|(path, hash)| (RepoPathBuf::from_internal_string(path).unwrap(), (Mode::Normal, hash.to_string())))
            .collect()
    }

    #[test]
    fn test_diff_detects_added_modified_deleted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("same.txt"), "same").unwrap();
        std::fs::write(dir.path().join("changed.txt"), "new content").unwrap();
        std::fs::write(dir.path().join("new.txt"), "brand new").unwrap();
        let ignore = IgnoreMatcher::new(&[]).unwrap();
        let scanned = scan_working_dir(dir.path(), &ignore).unwrap();

        let same_hash = object_store::hash_file(&dir.path().join("same.txt")).unwrap();
        let previous = file_map(&[
            ("same.txt", &crate::hex_util::encode_hex(&same_hash)),
            ("changed.txt", &"0".repeat(64)),
            ("gone.txt", &"1".repeat(64)),
        ]);

        let changes = diff_against_tree(&scanned, &previous);
        let mut by_path: BTreeMap<_, _> = changes.iter().map(|c| (c.path.as_internal_string(), c.state)).collect();
        assert_eq!(by_path.remove("changed.txt"), Some(ChangeState::Modified));
        assert_eq!(by_path.remove("new.txt"), Some(ChangeState::Added));
        assert_eq!(by_path.remove("gone.txt"), Some(ChangeState::Deleted));
        assert!(by_path.is_empty(), "same.txt must not appear as a change");
    }
}
