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

use std::collections::HashMap;

use wit_lib::config::RemoteConfig;
use wit_lib::config::RemoteKind;
use wit_testutils::TestRepo;
use wit_testutils::write_file;

fn disk_remote_config(path: &std::path::Path) -> RemoteConfig {
    RemoteConfig {
        name: "origin".to_string(),
        kind: RemoteKind::Disk,
        keys: HashMap::from([("path".to_string(), path.to_string_lossy().into_owned())]),
    }
}

#[tokio::test]
async fn test_push_then_fetch_round_trips_history() {
    let remote_dir = tempfile::tempdir().unwrap();
    let remote_config = disk_remote_config(remote_dir.path());

    let source = TestRepo::init();
    write_file(&source.root_path, "a.txt", "v1");
    source.repo.commit("v1").await.unwrap();
    source.repo.track_remote(remote_config.clone()).unwrap();
    source.repo.push().await.unwrap();

    write_file(&source.root_path, "a.txt", "v2");
    let second = source.repo.commit("v2").await.unwrap();
    source.repo.push().await.unwrap();

    let reader = TestRepo::init();
    reader.repo.track_remote(remote_config).unwrap();
    reader.repo.fetch().await.unwrap();
    reader.repo.checkout(&second).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(reader.path("a.txt")).unwrap(),
        "v2"
    );
}

#[tokio::test]
async fn test_clone_from_disk_remote_materializes_working_directory() {
    let remote_dir = tempfile::tempdir().unwrap();
    let remote_config = disk_remote_config(remote_dir.path());

    let source = TestRepo::init();
    write_file(&source.root_path, "a.txt", "hello");
    write_file(&source.root_path, "dir/b.txt", "nested");
    source.repo.track_remote(remote_config.clone()).unwrap();
    source.repo.commit("initial").await.unwrap();
    source.repo.push().await.unwrap();

    let dest_dir = tempfile::tempdir().unwrap();
    let dest = wit_lib::repo::Repository::clone_from(dest_dir.path(), remote_config, false, false)
        .await
        .unwrap();
    assert_eq!(dest.head().unwrap(), source.repo.head().unwrap());
    assert_eq!(std::fs::read_to_string(dest_dir.path().join("a.txt")).unwrap(), "hello");
    assert_eq!(
        std::fs::read_to_string(dest_dir.path().join("dir/b.txt")).unwrap(),
        "nested"
    );
}

#[tokio::test]
async fn test_clone_bare_skips_checkout() {
    let remote_dir = tempfile::tempdir().unwrap();
    let remote_config = disk_remote_config(remote_dir.path());

    let source = TestRepo::init();
    write_file(&source.root_path, "a.txt", "hello");
    source.repo.track_remote(remote_config.clone()).unwrap();
    source.repo.commit("initial").await.unwrap();
    source.repo.push().await.unwrap();

    let dest_dir = tempfile::tempdir().unwrap();
    let dest = wit_lib::repo::Repository::clone_from(dest_dir.path(), remote_config, true, false)
        .await
        .unwrap();
    assert_eq!(dest.head().unwrap(), source.repo.head().unwrap());
    assert!(!dest_dir.path().join("a.txt").exists());
}

#[tokio::test]
async fn test_rebase_replays_local_only_commits_onto_new_remote_head() {
    let remote_dir = tempfile::tempdir().unwrap();
    let remote_config = disk_remote_config(remote_dir.path());

    let writer = TestRepo::init();
    write_file(&writer.root_path, "shared.txt", "base");
    writer.repo.track_remote(remote_config.clone()).unwrap();
    writer.repo.commit("base").await.unwrap();
    writer.repo.push().await.unwrap();

    let local = TestRepo::init();
    local.repo.track_remote(remote_config.clone()).unwrap();
    local.repo.rebase().await.unwrap();
    write_file(&local.root_path, "local_only.txt", "mine");
    local.repo.commit("add local file").await.unwrap();

    write_file(&writer.root_path, "shared.txt", "updated upstream");
    writer.repo.commit("update shared").await.unwrap();
    writer.repo.push().await.unwrap();

    local.repo.rebase().await.unwrap();

    assert_eq!(
        std::fs::read_to_string(local.path("shared.txt")).unwrap(),
        "updated upstream"
    );
    assert_eq!(
        std::fs::read_to_string(local.path("local_only.txt")).unwrap(),
        "mine"
    );
}
