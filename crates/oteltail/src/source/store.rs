// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Object stores the adapter reads log objects from.

use std::io::{ErrorKind, Read};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::MultiGzDecoder;
use reqwest::{StatusCode, Url};
use tracing::debug;

use crate::error::FetchError;
use crate::source::LogObjectReference;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Reads the raw bytes of a log object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Reads the whole object. Failures are reported, never retried.
    async fn fetch_object(&self, reference: &LogObjectReference) -> Result<Vec<u8>, FetchError>;
}

/// Inflates gzip objects, returns anything else unchanged.
pub fn inflate(bytes: Vec<u8>) -> Result<Vec<u8>, FetchError> {
    if !bytes.starts_with(&GZIP_MAGIC) {
        return Ok(bytes);
    }
    let mut decoder = MultiGzDecoder::new(bytes.as_slice());
    let mut inflated = Vec::with_capacity(bytes.len() * 4);
    decoder
        .read_to_end(&mut inflated)
        .map_err(|e| FetchError::Decompress(e.to_string()))?;
    Ok(inflated)
}

/// Objects laid out on disk as `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsObjectStore { root: root.into() }
    }

    /// `None` when bucket or key would escape the root.
    fn path(&self, reference: &LogObjectReference) -> Option<PathBuf> {
        let relative = Path::new(&reference.bucket).join(&reference.key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn fetch_object(&self, reference: &LogObjectReference) -> Result<Vec<u8>, FetchError> {
        let not_found = || FetchError::NotFound {
            bucket: reference.bucket.clone(),
            key: reference.key.clone(),
        };
        let path = self.path(reference).ok_or_else(not_found)?;
        debug!("Reading {}", path.display());
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(FetchError::Io(e)),
        }
    }
}

/// Path-style object endpoint: `GET {base_url}/{bucket}/{key}`.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpObjectStore {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: Url, timeout: Duration) -> Self {
        HttpObjectStore {
            client,
            base_url,
            timeout,
        }
    }

    fn object_url(&self, reference: &LogObjectReference) -> Result<Url, FetchError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| FetchError::Transport(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .push(&reference.bucket)
            .extend(reference.key.split('/'));
        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn fetch_object(&self, reference: &LogObjectReference) -> Result<Vec<u8>, FetchError> {
        let url = self.object_url(reference)?;
        debug!("Fetching {url}");

        let transport = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Transport(e.to_string())
            }
        };

        let resp = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport)?;

        match resp.status() {
            StatusCode::NOT_FOUND => Err(FetchError::NotFound {
                bucket: reference.bucket.clone(),
                key: reference.key.clone(),
            }),
            status if status.is_success() => Ok(resp.bytes().await.map_err(transport)?.to_vec()),
            status => Err(FetchError::Status(status.as_u16())),
        }
    }
}
