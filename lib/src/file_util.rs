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

//! Filesystem helpers: path-safety checks and atomic, content-addressed
//! writes.

use std::fs::File;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use tempfile::NamedTempFile;
use tempfile::PersistError;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Cannot access {path}")]
pub struct PathError {
    pub path: PathBuf,
    pub source: io::Error,
}

pub trait IoResultExt<T> {
    fn context(self, path: impl AsRef<Path>) -> Result<T, PathError>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn context(self, path: impl AsRef<Path>) -> Result<T, PathError> {
        self.map_err(|error| PathError {
            path: path.as_ref().to_path_buf(),
            source: error,
        })
    }
}

/// A computed on-disk path escaped its intended base directory.
#[derive(Debug, Error)]
#[error("Path {attempted} escapes base directory {base}")]
pub struct PathTraversalError {
    pub base: PathBuf,
    pub attempted: PathBuf,
}

/// Joins `base` and `relative`, rejecting the result if any component of
/// `relative` would let it climb above `base` (`..`, absolute paths, or
/// embedded separators that normalize outside of `base`).
///
/// This exists because object paths are derived from attacker-influenced
/// data (hex hashes from a remote, file names from a working tree); every
/// hash-derived on-disk path must be checked before it is opened. A path
/// that would escape the base is a `PathTraversal` error, never silently
/// clamped.
pub fn safe_join(base: &Path, relative: &str) -> Result<PathBuf, PathTraversalError> {
    use std::path::Component;

    let mut joined = base.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(PathTraversalError {
                    base: base.to_path_buf(),
                    attempted: base.join(relative),
                });
            }
        }
    }
    if !joined.starts_with(base) {
        return Err(PathTraversalError {
            base: base.to_path_buf(),
            attempted: joined,
        });
    }
    Ok(joined)
}

/// Persists the temporary file after synchronizing its content.
///
/// After a crash, the persisted file has either its full prior content or
/// its full new content, never a truncated partial; it's up to the caller
/// to retry if the directory entry itself is lost.
///
/// See also <https://lwn.net/Articles/457667/> for the behavior on Linux.
pub fn persist_temp_file<P: AsRef<Path>>(
    temp_file: NamedTempFile,
    new_path: P,
) -> io::Result<File> {
    temp_file.as_file().sync_data()?;
    temp_file
        .persist(new_path)
        .map_err(|PersistError { error, file: _ }| error)
}

/// Like [`persist_temp_file()`], but on Windows avoids overwriting an
/// existing target (content-addressed writes are idempotent by
/// construction: if the target already exists, its content is the same).
pub fn persist_content_addressed_temp_file<P: AsRef<Path>>(
    temp_file: NamedTempFile,
    new_path: P,
) -> io::Result<File> {
    temp_file.as_file().sync_data()?;
    if cfg!(windows) {
        match temp_file.persist_noclobber(&new_path) {
            Ok(file) => Ok(file),
            Err(PersistError { error, file: _ }) => {
                if let Ok(existing_file) = File::open(new_path) {
                    Ok(existing_file)
                } else {
                    Err(error)
                }
            }
        }
    } else {
        temp_file
            .persist(new_path)
            .map_err(|PersistError { error, file: _ }| error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_join_accepts_normal_paths() {
        let base = Path::new("/repo/objects");
        assert_eq!(
            safe_join(base, "commits/ab/cdef").unwrap(),
            base.join("commits/ab/cdef")
        );
    }

    #[test]
    fn test_safe_join_rejects_traversal() {
        let base = Path::new("/repo/objects");
        assert!(safe_join(base, "../../etc/passwd").is_err());
        assert!(safe_join(base, "/etc/passwd").is_err());
    }
}
