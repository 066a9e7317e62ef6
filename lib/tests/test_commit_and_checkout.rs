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

use wit_testutils::TestRepo;
use wit_testutils::write_executable_file;
use wit_testutils::write_file;

#[tokio::test]
async fn test_commit_tracks_added_modified_and_deleted_files() {
    let fixture = TestRepo::init();
    write_file(&fixture.root_path, "a.txt", "one");
    write_file(&fixture.root_path, "dir/b.txt", "two");
    let first = fixture.repo.commit("add a and b").await.unwrap();
    assert!(fixture.repo.status().await.unwrap().is_empty());

    write_file(&fixture.root_path, "a.txt", "one-modified");
    std::fs::remove_file(fixture.path("dir/b.txt")).unwrap();
    write_file(&fixture.root_path, "c.txt", "three");
    let second = fixture.repo.commit("modify a, drop b, add c").await.unwrap();
    assert_ne!(first, second);
    assert!(fixture.repo.status().await.unwrap().is_empty());
    assert_eq!(fixture.repo.head().unwrap(), Some(second));
}

#[tokio::test]
async fn test_checkout_restores_executable_bit_on_unix() {
    let fixture = TestRepo::init();
    write_executable_file(&fixture.root_path, "run.sh", "#!/bin/sh\necho hi\n");
    let first = fixture.repo.commit("add script").await.unwrap();

    write_file(&fixture.root_path, "run.sh", "not executable anymore");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let path = fixture.path("run.sh");
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(perms.mode() & !0o111);
        std::fs::set_permissions(&path, perms).unwrap();
    }

    fixture.repo.checkout(&first).await.unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let perms = std::fs::metadata(fixture.path("run.sh")).unwrap().permissions();
        assert_eq!(perms.mode() & 0o111, 0o111);
    }
}

#[tokio::test]
async fn test_reopened_repository_sees_same_head() {
    let fixture = TestRepo::init();
    write_file(&fixture.root_path, "a.txt", "hello");
    let first = fixture.repo.commit("add a.txt").await.unwrap();

    let reopened = fixture.reopen();
    assert_eq!(reopened.head().unwrap(), Some(first));
}

#[tokio::test]
async fn test_status_reports_untracked_and_modified_files() {
    let fixture = TestRepo::init();
    write_file(&fixture.root_path, "a.txt", "hello");
    fixture.repo.commit("add a.txt").await.unwrap();

    write_file(&fixture.root_path, "a.txt", "hello, modified");
    write_file(&fixture.root_path, "b.txt", "new file");
    let status = fixture.repo.status().await.unwrap();
    assert_eq!(status.len(), 2);
}
