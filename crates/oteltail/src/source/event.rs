// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Notification payloads naming new log objects.
//!
//! Supported shapes:
//!
//! - S3 event notifications, `{"Records": [{"s3": {...}}]}`
//! - EventBridge `Object Created` events from `aws.s3`
//! - SQS and SNS envelopes whose message body is any supported payload,
//!   including another envelope
//! - the `s3:TestEvent` sent when a bucket notification is configured, which
//!   names no object

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::NotificationError;
use crate::source::LogObjectReference;

/// SNS inside SQS inside SNS is as deep as real deliveries go.
const MAX_ENVELOPE_DEPTH: usize = 4;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S3EventRecord {
    #[serde(default)]
    event_name: Option<String>,
    #[serde(default)]
    event_time: Option<DateTime<Utc>>,
    #[serde(default)]
    aws_region: Option<String>,
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct EventBridgeEvent {
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    #[serde(default)]
    region: Option<String>,
    detail: EventBridgeDetail,
}

#[derive(Debug, Deserialize)]
struct EventBridgeDetail {
    bucket: S3Bucket,
    object: S3Object,
}

/// Lists the objects named by a notification payload, in delivery order.
pub fn object_references(payload: &Value) -> Result<Vec<LogObjectReference>, NotificationError> {
    let mut references = Vec::new();
    collect(payload, 0, &mut references)?;
    Ok(references)
}

fn collect(
    payload: &Value,
    depth: usize,
    references: &mut Vec<LogObjectReference>,
) -> Result<(), NotificationError> {
    if depth > MAX_ENVELOPE_DEPTH {
        return Err(NotificationError::UnknownType);
    }

    if let Some(records) = payload.get("Records").and_then(Value::as_array) {
        for record in records {
            collect_record(record, depth, references)?;
        }
        return Ok(());
    }

    if payload.get("Event").and_then(Value::as_str) == Some("s3:TestEvent") {
        debug!("Ignoring S3 test event");
        return Ok(());
    }

    if payload.get("detail-type").and_then(Value::as_str) == Some("Object Created") {
        let event = EventBridgeEvent::deserialize(payload)?;
        references.push(LogObjectReference {
            bucket: event.detail.bucket.name,
            key: event.detail.object.key,
            size: event.detail.object.size,
            created_at: event.time.unwrap_or_default(),
            region: event.region,
        });
        return Ok(());
    }

    // SNS message delivered to SQS without raw message delivery
    if payload.get("Type").and_then(Value::as_str) == Some("Notification") {
        if let Some(message) = payload.get("Message").and_then(Value::as_str) {
            return collect(&serde_json::from_str(message)?, depth + 1, references);
        }
    }

    Err(NotificationError::UnknownType)
}

fn collect_record(
    record: &Value,
    depth: usize,
    references: &mut Vec<LogObjectReference>,
) -> Result<(), NotificationError> {
    if record.get("s3").is_some() {
        let record = S3EventRecord::deserialize(record)?;
        if let Some(name) = record
            .event_name
            .as_deref()
            .filter(|name| !name.starts_with("ObjectCreated"))
        {
            debug!("Ignoring {name} event for {}", record.s3.object.key);
            return Ok(());
        }
        references.push(LogObjectReference {
            bucket: record.s3.bucket.name,
            key: decode_object_key(&record.s3.object.key),
            size: record.s3.object.size,
            created_at: record.event_time.unwrap_or_default(),
            region: record.aws_region,
        });
        return Ok(());
    }

    // SQS
    if let Some(body) = record.get("body").and_then(Value::as_str) {
        return collect(&serde_json::from_str(body)?, depth + 1, references);
    }

    // SNS
    if let Some(message) = record
        .get("Sns")
        .and_then(|sns| sns.get("Message"))
        .and_then(Value::as_str)
    {
        return collect(&serde_json::from_str(message)?, depth + 1, references);
    }

    Err(NotificationError::UnknownType)
}

/// S3 notifications carry keys form-urlencoded: `+` for spaces, `%XX` for
/// everything else outside the unreserved set.
fn decode_object_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned()
}
