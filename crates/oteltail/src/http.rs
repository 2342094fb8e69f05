// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP transport for batch delivery.
//!
//! The forwarder only needs to POST a body and read back the status code, so
//! the transport is the narrow [`HttpPoster`] trait. [`ReqwestPoster`] is the
//! production implementation; tests swap in scripted posters.

use async_trait::async_trait;
use core::time::Duration;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::error::Error;
use tracing::{debug, error};

/// Answer of the destination to one POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostResponse {
    pub status: u16,
    pub body: String,
}

/// The request never produced an HTTP answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Other(String),
}

/// Sends one request body to the destination.
#[async_trait]
pub trait HttpPoster: Send + Sync {
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<PostResponse, TransportError>;
}

/// Builds a reqwest client with optional proxy configuration and timeout.
pub fn build_client(
    proxy_url: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));
    if let Some(proxy) = proxy_url {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    Ok(builder.build()?)
}

/// Same as [`build_client`], but falls back to a direct connection when the
/// proxy configuration is unusable.
#[must_use]
pub fn get_client(proxy_url: Option<&str>, timeout: Duration) -> reqwest::Client {
    match build_client(proxy_url, timeout) {
        Ok(client) => client,
        Err(e) => {
            error!("Unable to parse proxy configuration: {e}, falling back to direct connection");
            build_client(None, timeout).unwrap_or_else(|inner| {
                error!(
                    "Failed to build HTTP client without proxy: {inner}, using reqwest defaults"
                );
                reqwest::Client::new()
            })
        }
    }
}

/// [`HttpPoster`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestPoster {
    client: reqwest::Client,
}

impl ReqwestPoster {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        ReqwestPoster { client }
    }
}

pub(crate) fn header_map(headers: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => debug!("Skipping invalid header {name}"),
        }
    }
    map
}

#[async_trait]
impl HttpPoster for ReqwestPoster {
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<PostResponse, TransportError> {
        let resp = self
            .client
            .post(url)
            .headers(header_map(headers))
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Other(e.to_string())
                }
            })?;
        let status = resp.status().as_u16();
        // the body is only interesting when the batch was refused
        let body = if resp.status().is_success() {
            String::new()
        } else {
            resp.text().await.unwrap_or_default()
        };
        Ok(PostResponse { status, body })
    }
}
