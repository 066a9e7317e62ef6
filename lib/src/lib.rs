// Copyright 2023 The Jujutsu Authors
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

//! Wit is a content-addressed version control engine: a single linear
//! history of commits, each pointing at a tree of content-addressed blobs,
//! synced against a pluggable remote (disk, HTTP, or S3).
//!
//! [`repo::Repository`] is the entry point most callers want: it owns a
//! working directory, the `.wild/` control directory beneath it, and the
//! object store used to read and write everything inside that. Everything
//! else in this crate is a building block `Repository` composes:
//!
//! - [`objects`] and [`object_id`]: the three object kinds (blob, tree,
//!   commit) and their content-addressed identifiers.
//! - [`object_store`]: framing, compression, and path layout for objects on
//!   a [`remote::Remote`], plus reachability traversal for push/fetch.
//! - [`remote`]: the uniform key/value transport and its disk, HTTP, and S3
//!   backends.
//! - [`scan`], [`tree_ops`], and [`tree_rebuild`]: turning a working
//!   directory into a tree object and back, incrementally where possible.
//! - [`config`], [`head`], and [`changelog`]: the small control files under
//!   `.wild/`.
//! - [`signing`]: request signing for Wild-over-HTTP and S3's SigV4.

pub mod changelog;
pub mod config;
pub mod file_util;
pub mod head;
pub mod hex_util;
pub mod ignore;
pub mod object_id;
pub mod object_store;
pub mod objects;
pub mod remote;
pub mod repo;
pub mod repo_path;
pub mod scan;
pub mod signing;
pub mod tree_ops;
pub mod tree_rebuild;
pub mod wire;

pub use object_id::BlobId;
pub use object_id::CommitId;
pub use object_id::TreeId;
pub use repo::Repository;
