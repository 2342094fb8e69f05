// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::time::Duration;

/// Errors raised while reading the configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// The notification payload is not one of the supported event shapes
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Unknown notification type")]
    UnknownType,

    #[error("Malformed notification: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// The log object could not be read. Never retried by the pipeline itself.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Object {bucket}/{key} not found")]
    NotFound { bucket: String, key: String },

    #[error("Failed to read object: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store answered with status {0}")]
    Status(u16),

    #[error("Object store unreachable: {0}")]
    Transport(String),

    #[error("Fetching object timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to decompress object: {0}")]
    Decompress(String),
}

/// A single failed delivery attempt that is worth retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryableFailure {
    /// 429 or 5xx.
    Status(u16),
    /// Connection refused, reset, DNS failure.
    Transport(String),
    /// The request did not complete within the request timeout.
    Timeout,
}

impl fmt::Display for RetryableFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryableFailure::Status(status) => write!(f, "status {status}"),
            RetryableFailure::Transport(msg) => write!(f, "transport error: {msg}"),
            RetryableFailure::Timeout => write!(f, "request timed out"),
        }
    }
}

/// A batch could not be delivered. Every variant is fatal for the batch.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Non-retryable 4xx answer.
    #[error("Destination rejected batch with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Delivery failed after {attempts} attempts, last failure: {last}")]
    Exhausted {
        attempts: u32,
        last: RetryableFailure,
    },

    #[error("Failed to encode batch: {0}")]
    Encode(String),
}

/// Processing of one object failed after its bytes were fetched
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Outcome of a failed `handle` call, reported to the invoking trigger
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error("Fetch failed for {bucket}/{key}: {source}")]
    Fetch {
        bucket: String,
        key: String,
        #[source]
        source: FetchError,
    },

    #[error("Processing failed for {bucket}/{key}: {source}")]
    Process {
        bucket: String,
        key: String,
        #[source]
        source: ProcessError,
    },

    #[error("Deadline exceeded while processing {bucket}/{key}")]
    Timeout { bucket: String, key: String },

    #[error(transparent)]
    Notification(#[from] NotificationError),
}
