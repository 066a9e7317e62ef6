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

//! Fixtures shared by `wit-lib`'s integration tests: a temp-directory
//! repository, small working-directory writers, and a source of
//! pseudo-random file content for tests that want many distinct blobs
//! without caring what's in them.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use rand::Rng as _;
use rand::SeedableRng as _;
use tempfile::TempDir;
use wit_lib::repo::Repository;

/// An initialized [`Repository`] rooted in a [`TempDir`] that is deleted
/// when the fixture is dropped. Most tests only need `repo`; `root` is kept
/// alive so the directory isn't cleaned up out from under it, and exposed
/// for tests that want to poke at the working directory directly.
pub struct TestRepo {
    _root: TempDir,
    pub root_path: PathBuf,
    pub repo: Repository,
}

impl TestRepo {
    /// Initializes a fresh repository in a new temporary directory.
    ///
    /// Also installs a `tracing` subscriber on first use, so a test run
    /// with `RUST_LOG` set shows the engine's own instrumentation instead
    /// of nothing at all.
    pub fn init() -> Self {
        static INIT_TRACING: std::sync::Once = std::sync::Once::new();
        INIT_TRACING.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });

        let root = tempfile::tempdir().expect("failed to create temp dir");
        let root_path = root.path().to_path_buf();
        let repo = Repository::init(&root_path).expect("failed to init repository");
        Self {
            _root: root,
            root_path,
            repo,
        }
    }

    /// Re-opens this fixture's repository as an independent [`Repository`]
    /// value, as a second process attaching to the same working directory
    /// would.
    pub fn reopen(&self) -> Repository {
        Repository::open(&self.root_path).expect("failed to reopen repository")
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root_path.join(relative)
    }
}

/// Writes `content` to `relative` under `root`, creating parent directories
/// as needed. Used to populate a working directory before `commit`.
pub fn write_file(root: &Path, relative: &str, content: impl AsRef<[u8]>) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create parent directories");
    }
    fs::write(&path, content).expect("failed to write file");
}

/// Writes `relative` and marks it executable on Unix; a no-op bit on other
/// platforms, since the engine only tracks the executable bit there.
pub fn write_executable_file(root: &Path, relative: &str, content: impl AsRef<[u8]>) {
    write_file(root, relative, content);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let path = root.join(relative);
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(perms.mode() | 0o111);
        fs::set_permissions(&path, perms).expect("failed to set executable bit");
    }
}

pub fn remove_file(root: &Path, relative: &str) {
    fs::remove_file(root.join(relative)).expect("failed to remove file");
}

/// A small deterministic PRNG wrapper for generating distinct-but-reproducible
/// blob content across a test, without reaching for real randomness.
pub struct RandomContent {
    rng: rand::rngs::StdRng,
}

impl RandomContent {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: rand::rngs::StdRng::seed_from_u64(seed),
        }
    }

    pub fn bytes(&mut self, len: usize) -> Vec<u8> {
        (0..len).map(|_| self.rng.random()).collect()
    }
}

/// Populates `root` with `count` files under `dir_name`, each holding
/// distinct random bytes, and returns their repository-relative paths.
pub fn write_random_files(root: &Path, dir_name: &str, count: usize, seed: u64) -> Vec<String> {
    let mut random = RandomContent::new(seed);
    let mut paths = Vec::with_capacity(count);
    for i in 0..count {
        let relative = format!("{dir_name}/file_{i}");
        write_file(root, &relative, random.bytes(64));
        paths.push(relative);
    }
    paths
}
