// Copyright 2022 The Jujutsu Authors
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

//! Repository configuration: `.wild/config`, an INI-like file.
//!
//! `[section]` and `[section:subsection]` headers group `key = value`
//! pairs. The only section the engine itself interprets is `core` (for
//! `core.remote`, the name of the tracked remote) and `remote:<name>`
//! sections (`kind`, plus kind-specific keys).

use std::collections::HashMap;
use std::path::Path;

use ini::Ini;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config file {path}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: ini::ParseError,
    },
    #[error("missing required key {key:?} in section {section:?}")]
    MissingKey { section: String, key: String },
    #[error("unknown remote kind {kind:?} (expected \"disk\", \"wild\" or \"s3\")")]
    UnknownRemoteKind { kind: String },
}

/// The kind of backend a `remote:<name>` section describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteKind {
    /// A directory on the local (or a mounted network) filesystem.
    Disk,
    /// A plain Wild remote reachable over HTTP, optionally request-signed.
    Wild,
    /// An S3-compatible object store, authenticated with SigV4.
    S3,
}

/// One `remote:<name>` section, plus whatever raw keys it carried: each
/// backend picks the keys it cares about (`url`, `bucket`, `region`, ...)
/// out of this map itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub name: String,
    pub kind: RemoteKind,
    pub keys: HashMap<String, String>,
}

impl RemoteConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.keys.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingKey {
            section: format!("remote:{}", self.name),
            key: key.to_string(),
        })
    }
}

/// A parsed `.wild/config` file.
#[derive(Debug, Clone, Default)]
pub struct Config {
    core: HashMap<String, String>,
    remotes: HashMap<String, RemoteConfig>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| match e {
            ini::Error::Io(source) => ConfigError::Io {
                path: path.to_path_buf(),
                source,
            },
            ini::Error::Parse(source) => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
        })?;
        Self::from_ini(&ini)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|source| ConfigError::Parse {
            path: std::path::PathBuf::new(),
            source,
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut core = HashMap::new();
        let mut remotes = HashMap::new();
        for (section, props) in ini.iter() {
            let Some(section) = section else { continue };
            if section == "core" {
                for (key, value) in props.iter() {
                    core.insert(key.to_string(), value.to_string());
                }
            } else if let Some(name) = section.strip_prefix("remote:") {
                let mut keys = HashMap::new();
                for (key, value) in props.iter() {
                    keys.insert(key.to_string(), value.to_string());
                }
                let kind = match keys.get("kind").map(String::as_str) {
                    Some("disk") => RemoteKind::Disk,
                    Some("wild") => RemoteKind::Wild,
                    Some("s3") => RemoteKind::S3,
                    Some(other) => {
                        return Err(ConfigError::UnknownRemoteKind {
                            kind: other.to_string(),
                        });
                    }
                    None => {
                        return Err(ConfigError::MissingKey {
                            section: section.to_string(),
                            key: "kind".to_string(),
                        });
                    }
                };
                remotes.insert(
                    name.to_string(),
                    RemoteConfig {
                        name: name.to_string(),
                        kind,
                        keys,
                    },
                );
            }
        }
        Ok(Self { core, remotes })
    }

    /// The name of the tracked remote (`core.remote`), if configured.
    pub fn core_remote(&self) -> Option<&str> {
        self.core.get("remote").map(String::as_str)
    }

    pub fn remote(&self, name: &str) -> Option<&RemoteConfig> {
        self.remotes.get(name)
    }

    /// The `remote:<name>` section named by `core.remote`, if both are
    /// present.
    pub fn tracked_remote(&self) -> Option<&RemoteConfig> {
        self.remote(self.core_remote()?)
    }

    pub fn render(&self) -> String {
        let mut ini = Ini::new();
        if !self.core.is_empty() {
            let section = ini.with_section(Some("core"));
            let mut section = section;
            for (key, value) in &self.core {
                section.set(key, value);
            }
        }
        for remote in self.remotes.values() {
            let section_name = format!("remote:{}", remote.name);
            let section = ini.with_section(Some(section_name));
            let mut section = section;
            for (key, value) in &remote.keys {
                section.set(key, value);
            }
        }
        let mut buf = Vec::new();
        ini.write_to(&mut buf).expect("writing to a Vec cannot fail");
        String::from_utf8(buf).expect("ini writer only emits UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_core_and_remote() {
        let text = "[core]\nremote = origin\n\n[remote:origin]\nkind = wild\nurl = https://example.com/repo\n";
        let config = Config::parse(text).unwrap();
        assert_eq!(config.core_remote(), Some("origin"));
        let remote = config.tracked_remote().unwrap();
        assert_eq!(remote.kind, RemoteKind::Wild);
        assert_eq!(remote.require("url").unwrap(), "https://example.com/repo");
    }

    #[test]
    fn test_disk_remote() {
        let text = "[remote:origin]\nkind = disk\npath = /tmp/wild-origin\n";
        let config = Config::parse(text).unwrap();
        let remote = config.remote("origin").unwrap();
        assert_eq!(remote.kind, RemoteKind::Disk);
        assert_eq!(remote.get("path"), Some("/tmp/wild-origin"));
    }

    #[test]
    fn test_s3_remote() {
        let text = "[remote:backup]\nkind = s3\nbucket = my-bucket\nregion = us-east-1\n";
        let config = Config::parse(text).unwrap();
        let remote = config.remote("backup").unwrap();
        assert_eq!(remote.kind, RemoteKind::S3);
        assert_eq!(remote.get("bucket"), Some("my-bucket"));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let text = "[remote:origin]\nkind = ftp\n";
        assert!(matches!(
            Config::parse(text),
            Err(ConfigError::UnknownRemoteKind { .. })
        ));
    }

    #[test]
    fn test_missing_kind_rejected() {
        let text = "[remote:origin]\nurl = https://example.com\n";
        assert!(matches!(
            Config::parse(text),
            Err(ConfigError::MissingKey { .. })
        ));
    }
}
