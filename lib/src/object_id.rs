// Copyright 2020-2024 The Jujutsu Authors
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

//! Typed, hex-rendered object hashes.
//!
//! Every object kind (blob/tree/commit) gets its own newtype wrapping the
//! raw 32-byte SHA-256 digest, so the type system catches a tree hash being
//! passed where a commit hash is expected. All three behave identically;
//! see the [`id_type!`] macro.

use std::fmt;

use crate::hex_util;

/// Common behavior of the per-kind hash newtypes.
pub trait ObjectId {
    /// Lowercase name of the object kind (`"blob"`, `"tree"`, `"commit"`).
    fn object_type(&self) -> &'static str;
    fn as_bytes(&self) -> &[u8];
    fn to_bytes(&self) -> Vec<u8>;
    /// 64 lowercase hex digits.
    fn hex(&self) -> String;
}

macro_rules! id_type {
    ($(#[$attr:meta])* $vis:vis $name:ident => $kind:literal) => {
        $(#[$attr])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        $vis struct $name(Vec<u8>);

        impl $name {
            pub fn new(bytes: Vec<u8>) -> Self {
                Self(bytes)
            }

            pub fn from_bytes(bytes: &[u8]) -> Self {
                Self(bytes.to_vec())
            }

            /// Parses a hash known at compile time (e.g. the empty tree hash).
            pub fn from_hex(hex_str: &'static str) -> Self {
                Self::try_from_hex(hex_str).unwrap()
            }

            pub fn try_from_hex(hex_str: impl AsRef<[u8]>) -> Option<Self> {
                hex_util::decode_hex(hex_str).map(Self)
            }
        }

        impl crate::object_id::ObjectId for $name {
            fn object_type(&self) -> &'static str {
                $kind
            }

            fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            fn to_bytes(&self) -> Vec<u8> {
                self.0.clone()
            }

            fn hex(&self) -> String {
                hex_util::encode_hex(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.hex()).finish()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(&self.hex())
            }
        }
    };
}

id_type!(
    /// Hash of a [`crate::objects::Blob`].
    pub BlobId => "blob"
);
id_type!(
    /// Hash of a [`crate::objects::Tree`].
    pub TreeId => "tree"
);
id_type!(
    /// Hash of a [`crate::objects::Commit`].
    pub CommitId => "commit"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_debug() {
        let id = BlobId::try_from_hex("ab".repeat(32)).unwrap();
        assert_eq!(format!("{id}"), "ab".repeat(32));
        assert_eq!(format!("{id:?}"), format!("BlobId(\"{}\")", "ab".repeat(32)));
    }

    #[test]
    fn test_try_from_hex_rejects_garbage() {
        assert!(BlobId::try_from_hex("not hex").is_none());
    }
}
