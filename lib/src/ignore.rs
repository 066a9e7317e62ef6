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

//! Working-directory ignore matching.
//!
//! Patterns come in two flavors: plain path prefixes (`build/`, `*.log`-style
//! glob handled as a regex) and explicit regexes wrapped as `re:<pattern>`.
//! `.wild/**` and `.DS_Store` are always ignored, regardless of what the
//! repository's own ignore file says.

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid ignore pattern {pattern:?}: {source}")]
pub struct InvalidPattern {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

enum Pattern {
    Prefix(String),
    Regex(Regex),
}

/// A compiled set of ignore patterns, checked in order against the
/// repo-relative, `/`-separated path of each candidate entry.
pub struct IgnoreMatcher {
    patterns: Vec<Pattern>,
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '.' | '+' | '(' | ')' | '|' | '^' | '$' | '[' | ']' | '{' | '}' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    out
}

impl IgnoreMatcher {
    /// Builds a matcher from user-supplied patterns plus the always-on
    /// defaults (`.wild/**`, `.DS_Store`).
    pub fn new(user_patterns: &[String]) -> Result<Self, InvalidPattern> {
        let mut patterns = Vec::new();
        for raw in DEFAULT_PATTERNS.iter().copied().chain(user_patterns.iter().map(String::as_str)) {
            patterns.push(Self::compile_one(raw)?);
        }
        Ok(Self { patterns })
    }

    fn compile_one(raw: &str) -> Result<Pattern, InvalidPattern> {
        if let Some(body) = raw.strip_prefix("re:") {
            let regex = Regex::new(body).map_err(|source| InvalidPattern {
                pattern: raw.to_string(),
                source,
            })?;
            return Ok(Pattern::Regex(regex));
        }
        if raw.contains('*') || raw.contains('?') {
            let regex = Regex::new(&glob_to_regex(raw)).map_err(|source| InvalidPattern {
                pattern: raw.to_string(),
                source,
            })?;
            return Ok(Pattern::Regex(regex));
        }
        Ok(Pattern::Prefix(raw.trim_end_matches('/').to_string()))
    }

    /// Returns whether `repo_relative_path` (always `/`-separated) matches
    /// any configured pattern.
    pub fn is_ignored(&self, repo_relative_path: &str) -> bool {
        self.patterns.iter().any(|pattern| match pattern {
            Pattern::Prefix(prefix) => {
                repo_relative_path == prefix
                    || repo_relative_path
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            Pattern::Regex(regex) => regex.is_match(repo_relative_path),
        })
    }
}

/// Patterns that are ignored in every repository, independent of
/// configuration: the control directory itself and platform litter.
pub const DEFAULT_PATTERNS: &[&str] = &[".wild/**", ".DS_Store"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_patterns_ignore_control_dir() {
        let matcher = IgnoreMatcher::new(&[]).unwrap();
        assert!(matcher.is_ignored(".wild/HEAD"));
        assert!(matcher.is_ignored(".wild/objects/blobs/ab/cdef"));
        assert!(matcher.is_ignored(".DS_Store"));
        assert!(!matcher.is_ignored("src/main.rs"));
    }

    #[test]
    fn test_prefix_pattern() {
        let matcher = IgnoreMatcher::new(&["target".to_string()]).unwrap();
        assert!(matcher.is_ignored("target/debug/build"));
        assert!(matcher.is_ignored("target"));
        assert!(!matcher.is_ignored("targets/foo"));
    }

    #[test]
    fn test_glob_pattern() {
        let matcher = IgnoreMatcher::new(&["*.log".to_string()]).unwrap();
        assert!(matcher.is_ignored("debug.log"));
        assert!(!matcher.is_ignored("debug.log.txt"));
    }

    #[test]
    fn test_regex_pattern() {
        let matcher = IgnoreMatcher::new(&["re:^build-[0-9]+$".to_string()]).unwrap();
        assert!(matcher.is_ignored("build-42"));
        assert!(!matcher.is_ignored("build-abc"));
    }
}
