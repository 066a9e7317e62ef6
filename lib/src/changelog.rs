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

//! The append-only human-readable commit log (`.wild/logs`,
//! `.wild/remotes/origin/logs`).
//!
//! This is advisory, not authoritative: HEAD and the object graph are the
//! source of truth for what a repository actually contains, and the log
//! exists purely so a reader can scan `timestamp,hash,parent,message` rows
//! without decoding commit objects one at a time. A missing or truncated log
//! entry is never treated as data loss.

use std::io::Write as _;
use std::path::Path;

use chrono::DateTime;
use chrono::Utc;
use thiserror::Error;

use crate::file_util;
use crate::hex_util;
use crate::object_id::CommitId;
use crate::object_id::ObjectId as _;
use crate::wire;

#[derive(Debug, Error)]
pub enum LogError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Path(#[from] file_util::PathError),
    #[error("log entry is malformed: {0}")]
    Malformed(String),
}

/// One row of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub hash: CommitId,
    pub parent: Option<CommitId>,
    pub message: String,
}

/// The empty log body under its MIME-ish header, used both to seed a new
/// local log file and to seed a remote's tracking-slot copy.
pub fn render_empty() -> String {
    wire::render_block(&[("Content-Type", "text/csv; profile=logs")], "")
}

pub fn render_row(entry: &LogEntry) -> String {
    let parent = entry.parent.as_ref().map(|p| p.hex()).unwrap_or_default();
    format!(
        "{},{},{},{}\n",
        wire::format_rfc1123(entry.timestamp),
        entry.hash.hex(),
        parent,
        wire::csv_quote(&entry.message),
    )
}

pub fn parse_row(line: &str) -> Result<LogEntry, LogError> {
    let fields = wire::csv_fields(line).map_err(|e| LogError::Malformed(e.to_string()))?;
    let [timestamp, hash, parent, message] =
        <[String; 4]>::try_from(fields).map_err(|fields| {
            LogError::Malformed(format!("expected 4 CSV fields, got {}", fields.len()))
        })?;
    let timestamp = wire::parse_rfc1123(&timestamp)
        .ok_or_else(|| LogError::Malformed(format!("invalid timestamp {timestamp:?}")))?;
    if !hex_util::is_well_formed_hash(&hash) {
        return Err(LogError::Malformed(format!("invalid hash {hash:?}")));
    }
    let hash = CommitId::from_bytes(&hex_util::decode_hex(&hash).unwrap());
    let parent = if parent.is_empty() {
        None
    } else {
        if !hex_util::is_well_formed_hash(&parent) {
            return Err(LogError::Malformed(format!("invalid parent hash {parent:?}")));
        }
        Some(CommitId::from_bytes(&hex_util::decode_hex(&parent).unwrap()))
    };
    Ok(LogEntry {
        timestamp,
        hash,
        parent,
        message,
    })
}

/// Parses every row out of a log's full text, independent of whether that
/// text came from a local file or a remote's `logs` path.
pub fn parse_all(text: &str) -> Result<Vec<LogEntry>, LogError> {
    let (headers, body) = wire::parse_block(text).map_err(|e| LogError::Malformed(e.to_string()))?;
    if wire::header_value(&headers, "Content-Type") != Some("text/csv; profile=logs") {
        return Err(LogError::Malformed(
            "log missing Content-Type: text/csv; profile=logs".to_string(),
        ));
    }
    body.lines().filter(|l| !l.is_empty()).map(parse_row).collect()
}

/// If `path` doesn't exist yet, creates it with an empty body under the
/// `text/csv; profile=logs` header, then appends `entry` as a new row.
/// Appends never rewrite existing rows, so a crash mid-append can only ever
/// lose the entry being written, never corrupt history already recorded.
pub fn append(path: &Path, entry: &LogEntry) -> Result<(), LogError> {
    if !path.exists() {
        file_util::IoResultExt::context(std::fs::write(path, render_empty()), path)?;
    }
    let mut file = file_util::IoResultExt::context(
        std::fs::OpenOptions::new().append(true).open(path),
        path,
    )?;
    file_util::IoResultExt::context(file.write_all(render_row(entry).as_bytes()), path)?;
    Ok(())
}

/// Reads every entry in the log, oldest first.
pub fn read_all(path: &Path) -> Result<Vec<LogEntry>, LogError> {
    let text = file_util::IoResultExt::context(std::fs::read_to_string(path), path)?;
    parse_all(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: i64, hash: u8, parent: Option<u8>, message: &str) -> LogEntry {
        LogEntry {
            timestamp: DateTime::from_timestamp(n, 0).unwrap(),
            hash: CommitId::from_bytes(&[hash; 32]),
            parent: parent.map(|p| CommitId::from_bytes(&[p; 32])),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_append_and_read_all() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs");
        append(&path, &entry(1, 1, None, "root commit")).unwrap();
        append(&path, &entry(2, 2, Some(1), "second, with a comma")).unwrap();
        let entries = read_all(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "root commit");
        assert_eq!(entries[1].parent, Some(CommitId::from_bytes(&[1; 32])));
        assert_eq!(entries[1].message, "second, with a comma");
    }

    #[test]
    fn test_quotes_messages_containing_commas() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs");
        append(&path, &entry(1, 1, None, "fix: a, b, c")).unwrap();
        let entries = read_all(&path).unwrap();
        assert_eq!(entries[0].message, "fix: a, b, c");
    }
}
