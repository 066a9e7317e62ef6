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

//! A [`Remote`] backed by a plain Wild HTTP server.
//!
//! `GET`/`HEAD`/`DELETE` map directly onto `get`/`exists`/`delete`; `PUT`
//! carries an Ed25519 signature when a signer is configured, since writes
//! are the only operation a malicious peer could use to corrupt the store.
//! `list` hits `<prefix>?list=1` and expects a newline-separated body of
//! relative paths.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use reqwest::StatusCode;

use crate::remote::Remote;
use crate::remote::RemoteError;
use crate::remote::DEFAULT_TIMEOUT;
use crate::signing::RequestSigner;

pub struct HttpRemote {
    base_url: String,
    client: Client,
    signer: Option<RequestSigner>,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, signer: Option<RequestSigner>) -> Self {
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("reqwest client configuration is valid");
        Self {
            base_url,
            client,
            signer,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn request_path(&self, path: &str) -> String {
        format!("/{path}")
    }

    fn unavailable(path: &str, source: reqwest::Error) -> RemoteError {
        RemoteError::Unavailable {
            path: path.to_string(),
            source: Box::new(source),
        }
    }
}

#[async_trait]
impl Remote for HttpRemote {
    async fn exists(&self, path: &str) -> Result<bool, RemoteError> {
        let response = self
            .client
            .head(self.url(path))
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
        let response = self
            .client
            .get(self.url(path))
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
        let mut request = self.client.put(self.url(path));
        if let Some(signer) = &self.signer {
            let headers = signer.sign("PUT", &self.request_path(path), Utc::now());
            request = request
                .header("X-Wild-Signature", headers.signature)
                .header("X-Wild-Timestamp", headers.timestamp);
        }
        let response = request
            .body(content.to_vec())
            .send()
            .await
            .map_err(|e| Self::unavailable(path, e))?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT => {
                Err(RemoteError::PreconditionFailed {
                    path: path.to_string(),
                })
            }
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => Err(RemoteError::Forbidden {
                path: path.to_string(),
            }),
            status => Err(RemoteError::BadResponse {
                path: path.to_string(),
                detail: format!("unexpected status {status}"),
            }),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        let mut request = self.client.delete(self.url(path));
        if let Some(signer) = &self.signer {
            let headers = signer.sign("DELETE", &self.request_path(path), Utc::now());
            request = request
                .header("X-Wild-Signature", headers.signature)
                .header("X-Wild-Timestamp", headers.timestamp);
        }
        let response = request.send().await.map_err(|e| Self::unavailable(path, e))?;
        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(()),
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => Err(RemoteError::Forbidden {
                path: path.to_string(),
            }),
            status => Err(RemoteError::BadResponse {
                path: path.to_string(),
                detail: format!("unexpected status {status}"),
            }),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        let response = self
            .client
            .get(self.url(prefix))
            .query(&[("list", "1")])
            .send()
            .await
            .map_err(|e| Self::unavailable(prefix, e))?;
        match response.status() {
            StatusCode::OK => {
                let body = response
                    .text()
                    .await
                    .map_err(|e| Self::unavailable(prefix, e))?;
                Ok(body.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
            }
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status => Err(RemoteError::BadResponse {
                path: prefix.to_string(),
                detail: format!("unexpected status {status}"),
            }),
        }
    }
}
