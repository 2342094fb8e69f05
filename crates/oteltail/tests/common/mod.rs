// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use async_trait::async_trait;
use oteltail::error::FetchError;
use oteltail::http::{HttpPoster, PostResponse, TransportError};
use oteltail::source::store::ObjectStore;
use oteltail::source::LogObjectReference;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub const WRITE_ADDRESS: &str = "http://collector.test/v1/logs";

/// One ALB access-log line for `path` answered with `status` at `time`.
pub fn alb_line(time: &str, status: u16, path: &str) -> String {
    format!(
        r#"https {time} app/my-loadbalancer/50dc6c495c0c9188 192.168.131.39:2817 10.0.0.1:80 0.000 0.001 0.000 {status} {status} 34 366 "GET https://www.example.com:443{path} HTTP/1.1" "curl/7.46.0" ECDHE-RSA-AES128-GCM-SHA256 TLSv1.2 arn:aws:elasticloadbalancing:us-east-2:123456789012:targetgroup/my-targets/73e2d6bc24d8a067 "Root=1-58337262-36d228ad5d99923122bbe354" "www.example.com" "-" 0 {time} "forward" "-" "-" "10.0.0.1:80" "{status}" "-" "-""#
    )
}

/// Objects held in memory, keyed by `(bucket, key)`.
#[derive(Default)]
pub struct MemoryStore {
    objects: HashMap<(String, String), Vec<u8>>,
    pub fetches: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn with(mut self, bucket: &str, key: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.objects
            .insert((bucket.to_string(), key.to_string()), bytes.into());
        self
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn fetch_object(&self, reference: &LogObjectReference) -> Result<Vec<u8>, FetchError> {
        self.fetches.lock().unwrap().push(reference.key.clone());
        self.objects
            .get(&(reference.bucket.clone(), reference.key.clone()))
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                bucket: reference.bucket.clone(),
                key: reference.key.clone(),
            })
    }
}

/// What a [`RecordingPoster`] does with one request.
pub enum Reply {
    Status(u16),
    Transport,
    /// Never answers.
    Hang,
}

/// Answers POSTs from a script, 200 once the script runs out, and keeps
/// every request it saw.
#[derive(Default)]
pub struct RecordingPoster {
    script: Mutex<VecDeque<Reply>>,
    pub requests: Mutex<Vec<Vec<u8>>>,
}

impl RecordingPoster {
    pub fn new(script: Vec<Reply>) -> Self {
        RecordingPoster {
            script: Mutex::new(script.into()),
            requests: Mutex::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every record of every request, in send order.
    pub fn records(&self) -> Vec<serde_json::Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .flat_map(|body| {
                let batch: Vec<serde_json::Value> = serde_json::from_slice(body).unwrap();
                batch
            })
            .collect()
    }
}

#[async_trait]
impl HttpPoster for RecordingPoster {
    async fn post(
        &self,
        url: &str,
        _headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<PostResponse, TransportError> {
        assert_eq!(url, WRITE_ADDRESS);
        self.requests.lock().unwrap().push(body);
        let reply = self.script.lock().unwrap().pop_front();
        match reply {
            None => Ok(PostResponse {
                status: 200,
                body: String::new(),
            }),
            Some(Reply::Status(status)) => Ok(PostResponse {
                status,
                body: String::new(),
            }),
            Some(Reply::Transport) => Err(TransportError::Other("connection reset".to_string())),
            Some(Reply::Hang) => std::future::pending().await,
        }
    }
}
