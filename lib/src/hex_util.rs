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

//! Hex string helpers used for rendering and parsing object hashes.

/// Number of hex digits in a rendered SHA-256 object hash.
pub const HASH_HEX_LEN: usize = 64;
/// Number of raw bytes in a SHA-256 digest.
pub const HASH_BYTE_LEN: usize = 32;

/// Encodes `data` as a lowercase hex string.
pub fn encode_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Decodes a hex string into bytes. Returns `None` if the input isn't valid
/// hex (wrong length parity or non-hex-digit characters).
pub fn decode_hex(hex_str: impl AsRef<[u8]>) -> Option<Vec<u8>> {
    hex::decode(hex_str.as_ref()).ok()
}

/// Returns whether `s` is exactly [`HASH_HEX_LEN`] lowercase hex digits.
pub fn is_well_formed_hash(s: &str) -> bool {
    s.len() == HASH_HEX_LEN && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let bytes = [0u8, 1, 2, 253, 254, 255];
        let hex_str = encode_hex(&bytes);
        assert_eq!(decode_hex(&hex_str).unwrap(), bytes);
    }

    #[test]
    fn test_well_formed() {
        assert!(is_well_formed_hash(&"a".repeat(64)));
        assert!(!is_well_formed_hash(&"a".repeat(63)));
        assert!(!is_well_formed_hash(&"A".repeat(64)));
        assert!(!is_well_formed_hash(&"g".repeat(64)));
    }
}
