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

//! Request signing for write-capable remotes.
//!
//! Plain Wild remotes sign mutating requests with Ed25519
//! (`X-Wild-Signature` / `X-Wild-Timestamp`); S3-like remotes are signed
//! with AWS SigV4 instead. Both live here because both answer the same
//! question a remote asks before a write: "what headers prove this request
//! is authorized?"

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::DateTime;
use chrono::Utc;
use ed25519_dalek::Signature;
use ed25519_dalek::Signer as _;
use ed25519_dalek::SigningKey;
use ed25519_dalek::VerifyingKey;
use hmac::Hmac;
use hmac::Mac;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("private key is not valid 32-byte Ed25519 key material")]
    InvalidKey,
    #[error("signature does not match the expected request")]
    InvalidSignature,
}

/// An Ed25519 keypair used to sign writes to a plain Wild remote.
pub struct RequestSigner {
    key: SigningKey,
}

/// The two headers a signed request carries, in addition to its normal
/// method/path/body.
pub struct SignedHeaders {
    pub signature: String,
    pub timestamp: String,
}

impl RequestSigner {
    pub fn from_bytes(private_key: &[u8]) -> Result<Self, SigningError> {
        let bytes: [u8; 32] = private_key.try_into().map_err(|_| SigningError::InvalidKey)?;
        Ok(Self {
            key: SigningKey::from_bytes(&bytes),
        })
    }

    fn signing_payload(method: &str, path: &str, timestamp: &str) -> Vec<u8> {
        format!("{method}\n{path}\n{timestamp}").into_bytes()
    }

    /// Signs a request, returning the headers the remote transport should
    /// attach before sending it. The timestamp is unix seconds, matching
    /// `X-Wild-Timestamp`'s wire format exactly so the signed payload and
    /// the header a verifier reads are byte-identical.
    pub fn sign(&self, method: &str, path: &str, now: DateTime<Utc>) -> SignedHeaders {
        let timestamp = now.timestamp().to_string();
        let payload = Self::signing_payload(method, path, &timestamp);
        let signature = self.key.sign(&payload);
        SignedHeaders {
            signature: BASE64.encode(signature.to_bytes()),
            timestamp,
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

/// Verifies a signed request against a known public key. Used by test
/// doubles and by remotes that accept signed pushes from multiple writers.
pub fn verify(
    public_key: &VerifyingKey,
    method: &str,
    path: &str,
    timestamp: &str,
    signature_b64: &str,
) -> Result<(), SigningError> {
    let signature_bytes = BASE64.decode(signature_b64).map_err(|_| SigningError::InvalidSignature)?;
    let signature = Signature::from_slice(&signature_bytes).map_err(|_| SigningError::InvalidSignature)?;
    let payload = RequestSigner::signing_payload(method, path, timestamp);
    public_key
        .verify_strict(&payload, &signature)
        .map_err(|_| SigningError::InvalidSignature)
}

type HmacSha256 = Hmac<Sha256>;

/// Minimal AWS Signature Version 4 signer, scoped to what an S3-compatible
/// `PUT`/`GET`/`DELETE`/`LIST` remote needs: a single-region, single-service
/// (`s3`) request signature with no session token.
pub struct SigV4Signer {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

pub struct SigV4Headers {
    pub authorization: String,
    pub x_amz_date: String,
    pub x_amz_content_sha256: String,
}

impl SigV4Signer {
    fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// Computes the headers for a request to `host` at `canonical_uri` with
    /// the given `method` and `body`.
    pub fn sign(
        &self,
        method: &str,
        host: &str,
        canonical_uri: &str,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> SigV4Headers {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let payload_hash = Self::sha256_hex(body);

        let canonical_headers = format!(
            "host:{host}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n"
        );
        let signed_headers = "host;x-amz-content-sha256;x-amz-date";
        let canonical_request = format!(
            "{method}\n{canonical_uri}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
        );

        let credential_scope = format!("{date_stamp}/{}/s3/aws4_request", self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
            Self::sha256_hex(canonical_request.as_bytes())
        );

        let k_date = Self::hmac(format!("AWS4{}", self.secret_access_key).as_bytes(), date_stamp.as_bytes());
        let k_region = Self::hmac(&k_date, self.region.as_bytes());
        let k_service = Self::hmac(&k_region, b"s3");
        let k_signing = Self::hmac(&k_service, b"aws4_request");
        let signature = hex::encode(Self::hmac(&k_signing, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.access_key_id
        );

        SigV4Headers {
            authorization,
            x_amz_date: amz_date,
            x_amz_content_sha256: payload_hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ed25519_sign_and_verify_roundtrip() {
        let signer = RequestSigner::from_bytes(&[7u8; 32]).unwrap();
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let headers = signer.sign("PUT", "/objects/blobs/ab/cdef", now);
        verify(
            &signer.verifying_key(),
            "PUT",
            "/objects/blobs/ab/cdef",
            &headers.timestamp,
            &headers.signature,
        )
        .unwrap();
    }

    #[test]
    fn test_ed25519_rejects_tampered_path() {
        let signer = RequestSigner::from_bytes(&[7u8; 32]).unwrap();
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let headers = signer.sign("PUT", "/objects/blobs/ab/cdef", now);
        let result = verify(
            &signer.verifying_key(),
            "PUT",
            "/objects/blobs/ab/ffff",
            &headers.timestamp,
            &headers.signature,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_sigv4_is_deterministic() {
        let signer = SigV4Signer {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY".to_string(),
            region: "us-east-1".to_string(),
        };
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let a = signer.sign("PUT", "example-bucket.s3.amazonaws.com", "/objects/blobs/ab/cdef", b"data", now);
        let b = signer.sign("PUT", "example-bucket.s3.amazonaws.com", "/objects/blobs/ab/cdef", b"data", now);
        assert_eq!(a.authorization, b.authorization);
    }
}
