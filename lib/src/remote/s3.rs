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

//! A [`Remote`] backed by an S3-compatible bucket.
//!
//! Every request is signed with SigV4; there's no anonymous path since S3
//! itself doesn't offer one worth relying on for a private repository.
//! `list` uses the `?list-type=2&prefix=` bucket listing API and parses the
//! handful of `<Key>` elements out of the XML response without pulling in a
//! full XML parser.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use reqwest::StatusCode;

use crate::remote::Remote;
use crate::remote::RemoteError;
use crate::remote::DEFAULT_TIMEOUT;
use crate::signing::SigV4Signer;

pub struct S3Remote {
    bucket: String,
    host: String,
    client: Client,
    signer: SigV4Signer,
}

impl S3Remote {
    pub fn new(bucket: impl Into<String>, region: impl Into<String>, access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        let bucket = bucket.into();
        let region = region.into();
        let host = format!("{bucket}.s3.{region}.amazonaws.com");
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("reqwest client configuration is valid");
        Self {
            bucket,
            host,
            client,
            signer: SigV4Signer {
                access_key_id: access_key_id.into(),
                secret_access_key: secret_access_key.into(),
                region,
            },
        }
    }

    fn url(&self, canonical_uri: &str) -> String {
        format!("https://{}{canonical_uri}", self.host)
    }

    fn unavailable(path: &str, source: reqwest::Error) -> RemoteError {
        RemoteError::Unavailable {
            path: path.to_string(),
            source: Box::new(source),
        }
    }
}

#[async_trait]
impl Remote for S3Remote {
    async fn exists(&self, path: &str) -> Result<bool, RemoteError> {
        let canonical_uri = format!("/{path}");
        let headers = self.signer.sign("HEAD", &self.host, &canonical_uri, b"", Utc::now());
        let response = self
            .client
            .head(self.url(&canonical_uri))
            .header("Authorization", headers.authorization)
            .header("x-amz-date", headers.x_amz_date)
            .header("x-amz-content-sha256", headers.x_amz_content_sha256)
            .send()
            .await
            .map_err(|e| Self::unavailable(path, e))?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(RemoteError::BadResponse {
                path: path.to_string(),
                detail: format!("unexpected status {status}"),
            }),
        }
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        let canonical_uri = format!("/{path}");
        let headers = self.signer.sign("GET", &self.host, &canonical_uri, b"", Utc::now());
        let response = self
            .client
            .get(self.url(&canonical_uri))
            .header("Authorization", headers.authorization)
            .header("x-amz-date", headers.x_amz_date)
            .header("x-amz-content-sha256", headers.x_amz_content_sha256)
            .send()
            .await
            .map_err(|e| Self::unavailable(path, e))?;
        match response.status() {
            StatusCode::OK => Ok(response
                .bytes()
                .await
                .map_err(|e| Self::unavailable(path, e))?
                .to_vec()),
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound {
                path: path.to_string(),
            }),
            status => Err(RemoteError::BadResponse {
                path: path.to_string(),
                detail: format!("unexpected status {status}"),
            }),
        }
    }

    async fn put(&self, path: &str, content: &[u8]) -> Result<(), RemoteError> {
        let canonical_uri = format!("/{path}");
        let headers = self.signer.sign("PUT", &self.host, &canonical_uri, content, Utc::now());
        let response = self
            .client
            .put(self.url(&canonical_uri))
            .header("Authorization", headers.authorization)
            .header("x-amz-date", headers.x_amz_date)
            .header("x-amz-content-sha256", &headers.x_amz_content_sha256)
            .body(content.to_vec())
            .send()
            .await
            .map_err(|e| Self::unavailable(path, e))?;
        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::PRECONDITION_FAILED => Err(RemoteError::PreconditionFailed {
                path: path.to_string(),
            }),
            StatusCode::FORBIDDEN => Err(RemoteError::Forbidden {
                path: path.to_string(),
            }),
            status => Err(RemoteError::BadResponse {
                path: path.to_string(),
                detail: format!("unexpected status {status}"),
            }),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        let canonical_uri = format!("/{path}");
        let headers = self.signer.sign("DELETE", &self.host, &canonical_uri, b"", Utc::now());
        let response = self
            .client
            .delete(self.url(&canonical_uri))
            .header("Authorization", headers.authorization)
            .header("x-amz-date", headers.x_amz_date)
            .header("x-amz-content-sha256", headers.x_amz_content_sha256)
            .send()
            .await
            .map_err(|e| Self::unavailable(path, e))?;
        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(()),
            StatusCode::FORBIDDEN => Err(RemoteError::Forbidden {
                path: path.to_string(),
            }),
            status => Err(RemoteError::BadResponse {
                path: path.to_string(),
                detail: format!("unexpected status {status}"),
            }),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        let canonical_uri = "/";
        let headers = self.signer.sign("GET", &self.host, canonical_uri, b"", Utc::now());
        let response = self
            .client
            .get(self.url(canonical_uri))
            .query(&[("list-type", "2"), ("prefix", prefix)])
            .header("Authorization", headers.authorization)
            .header("x-amz-date", headers.x_amz_date)
            .header("x-amz-content-sha256", headers.x_amz_content_sha256)
            .send()
            .await
            .map_err(|e| Self::unavailable(prefix, e))?;
        if response.status() != StatusCode::OK {
            return Err(RemoteError::BadResponse {
                path: prefix.to_string(),
                detail: format!("unexpected status {}", response.status()),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|e| Self::unavailable(prefix, e))?;
        Ok(parse_list_keys(&body))
    }
}

/// Pulls `<Key>...</Key>` contents out of an S3 `ListObjectsV2` XML response.
fn parse_list_keys(xml: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<Key>") {
        let after_tag = &rest[start + "<Key>".len()..];
        let Some(end) = after_tag.find("</Key>") else {
            break;
        };
        keys.push(after_tag[..end].to_string());
        rest = &after_tag[end + "</Key>".len()..];
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_keys() {
        let xml = "<ListBucketResult><Contents><Key>objects/blobs/aa/1</Key></Contents><Contents><Key>objects/blobs/bb/2</Key></Contents></ListBucketResult>";
        assert_eq!(
            parse_list_keys(xml),
            vec!["objects/blobs/aa/1".to_string(), "objects/blobs/bb/2".to_string()]
        );
    }

    #[test]
    fn test_parse_list_keys_empty() {
        let xml = "<ListBucketResult></ListBucketResult>";
        assert!(parse_list_keys(xml).is_empty());
    }
}
