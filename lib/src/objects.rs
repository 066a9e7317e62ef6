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

//! The three object kinds and their canonical, hash-stable byte encodings.
//!
//! Two tree encodings are equally defensible; this implementation fixes on
//! one: a CSV table framed in a MIME-ish header
//! (`Content-Type: text/csv; profile=tree`). That choice, once made, is load
//! bearing — changing it changes every tree hash in an existing repository.

use chrono::DateTime;
use chrono::Utc;
use thiserror::Error;

use crate::hex_util;
use crate::object_id::BlobId;
use crate::object_id::CommitId;
use crate::object_id::ObjectId as _;
use crate::object_id::TreeId;
use crate::repo_path::InvalidRepoPathComponent;
use crate::repo_path::RepoPathComponentBuf;
use crate::wire;

/// The three kinds of objects the store knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
}

impl ObjectKind {
    /// Directory name under `objects/`.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Blob => "blobs",
            Self::Tree => "trees",
            Self::Commit => "commits",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
        }
    }

    /// The kind a self-describing `Content-Type` header value identifies, if
    /// any. Blobs carry no header of their own -- their canonical bytes are
    /// raw file content -- so they never match here.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            TREE_CONTENT_TYPE => Some(Self::Tree),
            COMMIT_CONTENT_TYPE => Some(Self::Commit),
            _ => None,
        }
    }
}

pub const TREE_CONTENT_TYPE: &str = "text/csv; profile=tree";
pub const COMMIT_CONTENT_TYPE: &str = "text/x-wild-commit";

/// A file's content. The canonical encoding of a blob is simply its raw
/// bytes: blobs are terminal in the reachability graph and need no framing
/// of their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub content: Vec<u8>,
}

impl Blob {
    pub fn new(content: Vec<u8>) -> Self {
        Self { content }
    }

    pub fn canonical_bytes(&self) -> Vec<u8> {
        self.content.clone()
    }
}

/// The file mode recorded on a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Directory,
    Executable,
    Symlink,
}

impl Mode {
    pub fn code(self) -> &'static str {
        match self {
            Self::Normal => "100644",
            Self::Directory => "040000",
            Self::Executable => "100755",
            Self::Symlink => "120000",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "100644" => Some(Self::Normal),
            "040000" => Some(Self::Directory),
            "100755" => Some(Self::Executable),
            "120000" => Some(Self::Symlink),
            _ => None,
        }
    }

    pub fn is_directory(self) -> bool {
        matches!(self, Self::Directory)
    }
}

/// One entry in a [`Tree`]: a name, a mode, and the hash of whatever the
/// mode says it points at (a tree hash for `Directory`, a blob hash
/// otherwise).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: RepoPathComponentBuf,
    pub mode: Mode,
    pub hash: String,
}

impl TreeEntry {
    pub fn tree_id(&self) -> Option<TreeId> {
        self.mode.is_directory().then(|| TreeId::from_bytes(&hex_util::decode_hex(&self.hash).unwrap_or_default()))
    }

    pub fn blob_id(&self) -> Option<BlobId> {
        (!self.mode.is_directory()).then(|| BlobId::from_bytes(&hex_util::decode_hex(&self.hash).unwrap_or_default()))
    }
}

/// A directory snapshot: a sorted list of entries. Sorting is an invariant
/// of the canonical encoding, not just a presentation nicety -- two trees
/// with the same entries in different orders must hash the same.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn from_entries(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        Self { entries }
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut body = String::from("hash,mode,name\n");
        for entry in &self.entries {
            body.push_str(&entry.hash);
            body.push(',');
            body.push_str(entry.mode.code());
            body.push(',');
            body.push_str(&wire::csv_quote(entry.name.as_str()));
            body.push('\n');
        }
        wire::render_block(&[("Content-Type", TREE_CONTENT_TYPE)], &body).into_bytes()
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ObjectParseError> {
        let text = std::str::from_utf8(bytes)?;
        let (headers, body) = wire::parse_block(text)?;
        if wire::header_value(&headers, "Content-Type") != Some(TREE_CONTENT_TYPE) {
            return Err(ObjectParseError::Malformed(
                "tree object missing text/csv; profile=tree Content-Type".to_string(),
            ));
        }
        let mut lines = body.lines();
        if lines.next() != Some("hash,mode,name") {
            return Err(ObjectParseError::Malformed(
                "tree CSV body missing hash,mode,name header row".to_string(),
            ));
        }
        let mut entries = Vec::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let fields = wire::csv_fields(line)
                .map_err(|e| ObjectParseError::Malformed(e.to_string()))?;
            let [hash, mode, name] = <[String; 3]>::try_from(fields).map_err(|fields| {
                ObjectParseError::Malformed(format!("expected 3 CSV fields, got {}", fields.len()))
            })?;
            if !hex_util::is_well_formed_hash(&hash) {
                return Err(ObjectParseError::InvalidHash(hash));
            }
            let mode =
                Mode::from_code(&mode).ok_or_else(|| ObjectParseError::InvalidMode(mode.clone()))?;
            let name = RepoPathComponentBuf::new(name)?;
            entries.push(TreeEntry { name, mode, hash });
        }
        if !entries.is_sorted_by(|a, b| a.name.as_str() < b.name.as_str()) {
            return Err(ObjectParseError::Malformed(
                "tree entries not sorted by name".to_string(),
            ));
        }
        Ok(Self { entries })
    }
}

/// A named snapshot in history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub tree: TreeId,
    pub parent: Option<CommitId>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Commit {
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let date = wire::format_rfc1123(self.timestamp);
        let mut headers = vec![
            ("Date", date.as_str()),
            ("Content-Type", COMMIT_CONTENT_TYPE),
        ];
        let tree_hex = self.tree.hex();
        headers.push(("Wild-Tree", tree_hex.as_str()));
        let parent_hex = self.parent.as_ref().map(|p| p.hex());
        if let Some(parent_hex) = &parent_hex {
            headers.push(("Wild-Parent", parent_hex.as_str()));
        }
        wire::render_block(&headers, &self.message).into_bytes()
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ObjectParseError> {
        let text = std::str::from_utf8(bytes)?;
        let (headers, body) = wire::parse_block(text)?;
        if wire::header_value(&headers, "Content-Type") != Some(COMMIT_CONTENT_TYPE) {
            return Err(ObjectParseError::Malformed(
                "commit object missing text/x-wild-commit Content-Type".to_string(),
            ));
        }
        let date = wire::header_value(&headers, "Date")
            .ok_or(ObjectParseError::MissingField("Date"))?;
        let timestamp = wire::parse_rfc1123(date)
            .ok_or_else(|| ObjectParseError::InvalidTimestamp(date.to_string()))?;
        let tree_hex = wire::header_value(&headers, "Wild-Tree")
            .ok_or(ObjectParseError::MissingField("Wild-Tree"))?;
        if !hex_util::is_well_formed_hash(tree_hex) {
            return Err(ObjectParseError::InvalidHash(tree_hex.to_string()));
        }
        let tree = TreeId::from_bytes(&hex_util::decode_hex(tree_hex).unwrap());
        // Absence of Wild-Parent means "no parent": the decoder must
        // tolerate it rather than erroring.
        let parent = match wire::header_value(&headers, "Wild-Parent") {
            None => None,
            Some(hex) if !hex_util::is_well_formed_hash(hex) => {
                return Err(ObjectParseError::InvalidHash(hex.to_string()));
            }
            Some(hex) => Some(CommitId::from_bytes(&hex_util::decode_hex(hex).unwrap())),
        };
        Ok(Self {
            tree,
            parent,
            message: body.to_string(),
            timestamp,
        })
    }
}

/// Any failure while parsing a canonical object body. The store surfaces
/// these as `CorruptObject`.
#[derive(Debug, Error)]
pub enum ObjectParseError {
    #[error("not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error(transparent)]
    MissingBodySeparator(#[from] wire::MissingBodySeparator),
    #[error("missing required field {0}")]
    MissingField(&'static str),
    #[error("invalid hash {0:?}")]
    InvalidHash(String),
    #[error("invalid mode {0:?}")]
    InvalidMode(String),
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("{0}")]
    Malformed(String),
}

impl From<InvalidRepoPathComponent> for ObjectParseError {
    fn from(e: InvalidRepoPathComponent) -> Self {
        Self::Malformed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, mode: Mode, hash: &str) -> TreeEntry {
        TreeEntry {
            name: RepoPathComponentBuf::new(name).unwrap(),
            mode,
            hash: hash.to_string(),
        }
    }

    #[test]
    fn test_tree_sorts_entries() {
        let tree = Tree::from_entries(vec![
            entry("foo.txt", Mode::Normal, &"1".repeat(64)),
            entry("bar.txt", Mode::Normal, &"2".repeat(64)),
        ]);
        let names: Vec<_> = tree.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["bar.txt", "foo.txt"]);
    }

    #[test]
    fn test_tree_roundtrip() {
        let tree = Tree::from_entries(vec![
            entry("a b,\"c\"", Mode::Normal, &"a".repeat(64)),
            entry("dir", Mode::Directory, &"b".repeat(64)),
        ]);
        let bytes = tree.canonical_bytes();
        let parsed = Tree::parse(&bytes).unwrap();
        assert_eq!(tree, parsed);
    }

    #[test]
    fn test_tree_permutation_invariance() {
        let a = Tree::from_entries(vec![
            entry("b", Mode::Normal, &"1".repeat(64)),
            entry("a", Mode::Normal, &"2".repeat(64)),
        ]);
        let b = Tree::from_entries(vec![
            entry("a", Mode::Normal, &"2".repeat(64)),
            entry("b", Mode::Normal, &"1".repeat(64)),
        ]);
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn test_commit_roundtrip_with_parent() {
        let commit = Commit {
            tree: TreeId::from_bytes(&[1; 32]),
            parent: Some(CommitId::from_bytes(&[2; 32])),
            message: "msg with\nnewline".to_string(),
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };
        let parsed = Commit::parse(&commit.canonical_bytes()).unwrap();
        assert_eq!(commit, parsed);
    }

    #[test]
    fn test_commit_roundtrip_without_parent() {
        let commit = Commit {
            tree: TreeId::from_bytes(&[1; 32]),
            parent: None,
            message: "init".to_string(),
            timestamp: DateTime::from_timestamp(0, 0).unwrap(),
        };
        let parsed = Commit::parse(&commit.canonical_bytes()).unwrap();
        assert_eq!(commit, parsed);
        assert!(!String::from_utf8(commit.canonical_bytes()).unwrap().contains("Wild-Parent"));
    }
}
