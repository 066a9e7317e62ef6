// Copyright 2020 The Jujutsu Authors
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

//! Slash-separated, repository-relative paths.
//!
//! A [`RepoPathBuf`] is always relative to the repository root and always
//! uses `/` as a separator regardless of platform. Each path segment is a
//! [`RepoPathComponentBuf`]: non-empty, containing neither `/` nor NUL, per
//! the tree entry name invariant.

use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use thiserror::Error;

/// A single path segment, validated on construction.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RepoPathComponentBuf {
    value: String,
}

#[derive(Debug, Error)]
#[error("Invalid repo path component {value:?}: must be non-empty and contain no '/' or NUL")]
pub struct InvalidRepoPathComponent {
    pub value: String,
}

impl RepoPathComponentBuf {
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidRepoPathComponent> {
        let value = value.into();
        if value.is_empty() || value.contains('/') || value.contains('\0') {
            return Err(InvalidRepoPathComponent { value });
        }
        Ok(Self { value })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for RepoPathComponentBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// A slash-separated path relative to the repository root. The root itself
/// is represented by an empty component list.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RepoPathBuf {
    components: Vec<RepoPathComponentBuf>,
}

impl RepoPathBuf {
    pub fn root() -> Self {
        Self { components: vec![] }
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Parses a `/`-separated relative path. The root is the empty string.
    pub fn from_internal_string(s: &str) -> Result<Self, InvalidRepoPathComponent> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        let components = s
            .split('/')
            .map(RepoPathComponentBuf::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { components })
    }

    pub fn components(&self) -> &[RepoPathComponentBuf] {
        &self.components
    }

    pub fn join(&self, component: &RepoPathComponentBuf) -> Self {
        let mut components = self.components.clone();
        components.push(component.clone());
        Self { components }
    }

    pub fn join_str(
        &self,
        name: impl Into<String>,
    ) -> Result<Self, InvalidRepoPathComponent> {
        Ok(self.join(&RepoPathComponentBuf::new(name)?))
    }

    /// Splits off the final component, returning `(parent, name)`. The root
    /// path has no parent.
    pub fn split(&self) -> Option<(Self, &RepoPathComponentBuf)> {
        let (last, rest) = self.components.split_last()?;
        Some((
            Self {
                components: rest.to_vec(),
            },
            last,
        ))
    }

    pub fn parent(&self) -> Option<Self> {
        self.split().map(|(parent, _)| parent)
    }

    /// Every ancestor directory of this path, starting with the root and
    /// ending with this path's own parent (exclusive of `self`).
    pub fn ancestors(&self) -> Vec<Self> {
        let mut result = Vec::with_capacity(self.components.len());
        let mut cur = Self::root();
        result.push(cur.clone());
        for component in &self.components[..self.components.len().saturating_sub(1)] {
            cur = cur.join(component);
            result.push(cur.clone());
        }
        result
    }

    /// Renders the path using `/` separators; the root renders as `""`.
    pub fn as_internal_string(&self) -> String {
        self.components
            .iter()
            .map(RepoPathComponentBuf::as_str)
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Converts to a platform-native relative filesystem path under `base`.
    pub fn to_fs_path(&self, base: &Path) -> PathBuf {
        let mut path = base.to_path_buf();
        for component in &self.components {
            path.push(component.as_str());
        }
        path
    }
}

impl fmt::Debug for RepoPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RepoPathBuf")
            .field(&self.as_internal_string())
            .finish()
    }
}

impl fmt::Display for RepoPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_internal_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_render() {
        let path = RepoPathBuf::from_internal_string("a/b/c").unwrap();
        assert_eq!(path.as_internal_string(), "a/b/c");
        assert_eq!(path.components().len(), 3);
    }

    #[test]
    fn test_root() {
        let root = RepoPathBuf::root();
        assert!(root.is_root());
        assert_eq!(root.as_internal_string(), "");
        assert_eq!(root.parent(), None);
    }

    #[test]
    fn test_split_and_join() {
        let path = RepoPathBuf::from_internal_string("a/b/c").unwrap();
        let (parent, name) = path.split().unwrap();
        assert_eq!(parent.as_internal_string(), "a/b");
        assert_eq!(name.as_str(), "c");
        assert_eq!(parent.join_str("c").unwrap(), path);
    }

    #[test]
    fn test_ancestors() {
        let path = RepoPathBuf::from_internal_string("a/b/c").unwrap();
        let ancestors: Vec<_> = path.ancestors().iter().map(|p| p.as_internal_string()).collect();
        assert_eq!(ancestors, vec!["".to_string(), "a".to_string(), "a/b".to_string()]);
    }

    #[test]
    fn test_rejects_slash_in_component() {
        assert!(RepoPathComponentBuf::new("a/b").is_err());
        assert!(RepoPathComponentBuf::new("").is_err());
    }
}
