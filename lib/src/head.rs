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

//! `HEAD`: the single mutable pointer a repository has, updated atomically
//! on every commit.
//!
//! On disk it's a MIME-ish header block (`Date`, `Content-Type:
//! text/plain`) followed by a blank line and either a 64-hex-digit commit
//! hash or nothing at all (an empty repository has no commits yet).

use std::path::Path;

use chrono::DateTime;
use chrono::Utc;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::file_util;
use crate::hex_util;
use crate::object_id::CommitId;
use crate::object_id::ObjectId as _;
use crate::wire;

#[derive(Debug, Error)]
pub enum HeadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Path(#[from] file_util::PathError),
    #[error("HEAD file is malformed: {0}")]
    Malformed(String),
}

/// Parses a HEAD record's text, independent of where it came from (a local
/// file or a remote's `HEAD` path). `Ok(None)` means a valid, empty
/// repository; `Err` means the record itself is malformed.
pub fn parse(text: &str) -> Result<Option<CommitId>, HeadError> {
    let (headers, body) = wire::parse_block(text).map_err(|e| HeadError::Malformed(e.to_string()))?;
    if wire::header_value(&headers, "Content-Type") != Some("text/plain") {
        return Err(HeadError::Malformed(
            "HEAD missing Content-Type: text/plain".to_string(),
        ));
    }
    let body = body.trim();
    if body.is_empty() {
        return Ok(None);
    }
    if !hex_util::is_well_formed_hash(body) {
        return Err(HeadError::Malformed(format!("HEAD body {body:?} is not a valid hash")));
    }
    Ok(Some(CommitId::from_bytes(&hex_util::decode_hex(body).unwrap())))
}

/// Renders a HEAD record for `commit` (or an empty one, for `None`).
pub fn render(commit: Option<&CommitId>, now: DateTime<Utc>) -> String {
    let body = commit.map(|id| id.hex()).unwrap_or_default();
    wire::render_block(
        &[("Date", &wire::format_rfc1123(now)), ("Content-Type", "text/plain")],
        &body,
    )
}

/// Reads the HEAD file at `path`. Returns `Ok(None)` for an empty
/// repository (a valid header block with an empty body), and
/// [`HeadError::Io`] with `NotFound` if the file doesn't exist at all --
/// callers that need "missing HEAD" as a distinct repository-corruption
/// condition should match on that themselves.
pub fn read(path: &Path) -> Result<Option<CommitId>, HeadError> {
    let text = file_util::IoResultExt::context(std::fs::read_to_string(path), path)?;
    parse(&text)
}

/// Atomically overwrites HEAD to point at `commit` (or at nothing, for
/// `None`), via write-to-temp-file-then-rename so a crash mid-write never
/// leaves a torn HEAD.
pub fn write(path: &Path, commit: Option<&CommitId>, now: DateTime<Utc>) -> Result<(), HeadError> {
    let dir = path.parent().expect("HEAD path always has a parent directory");
    let rendered = render(commit, now);
    let mut temp_file = file_util::IoResultExt::context(NamedTempFile::new_in(dir), dir)?;
    file_util::IoResultExt::context(
        std::io::Write::write_all(&mut temp_file, rendered.as_bytes()),
        dir,
    )?;
    file_util::IoResultExt::context(file_util::persist_temp_file(temp_file, path), path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_write_then_read_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("HEAD");
        write(&path, None, now()).unwrap();
        assert_eq!(read(&path).unwrap(), None);
    }

    #[test]
    fn test_write_then_read_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("HEAD");
        let id = CommitId::from_bytes(&[7; 32]);
        write(&path, Some(&id), now()).unwrap();
        assert_eq!(read(&path).unwrap(), Some(id));
    }

    #[test]
    fn test_rejects_malformed_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("HEAD");
        std::fs::write(&path, "Date: x\nContent-Type: text/plain\n\nnot-a-hash\n").unwrap();
        assert!(matches!(read(&path), Err(HeadError::Malformed(_))));
    }
}
