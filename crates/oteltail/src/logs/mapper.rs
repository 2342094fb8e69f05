//! Projection of structured access-log records onto OpenTelemetry log records.
//!
//! The mapper is pure: the same record and configuration always produce the
//! same [`TelemetryRecord`], and since every map in it is ordered, the same
//! serialized bytes.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::config::MapperConfig;
use crate::logs::constants::DECODE_ERROR_ATTRIBUTE;
use crate::logs::decoder::StructuredLogRecord;

const DEFAULT_SERVICE_NAME: &str = "oteltail";

/// OpenTelemetry severity ranges used for access logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    /// Severity of a request that completed with `status`.
    #[must_use]
    pub fn from_status(status: Option<u16>) -> Severity {
        match status {
            Some(500..) => Severity::Error,
            Some(400..=499) => Severity::Warn,
            _ => Severity::Info,
        }
    }

    #[must_use]
    pub fn number(self) -> u8 {
        match self {
            Severity::Info => 9,
            Severity::Warn => 13,
            Severity::Error => 17,
        }
    }

    #[must_use]
    pub fn text(self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

/// A normalised log event, one per structured record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub resource: BTreeMap<String, String>,
    #[serde(serialize_with = "serialize_as_string")]
    pub time_unix_nano: u64,
    pub severity_number: u8,
    pub severity_text: &'static str,
    pub body: String,
    pub attributes: BTreeMap<String, AttributeValue>,
}

// OTLP/JSON carries 64-bit integers as strings
fn serialize_as_string<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

/// Resource attributes shared by every record mapped with `config`.
///
/// `drop_attributes` only applies to the configured extras; the identity
/// keys are always present.
#[must_use]
pub fn resource(config: &MapperConfig) -> BTreeMap<String, String> {
    let mut resource = config.resource_attributes.clone();
    for dropped in &config.drop_attributes {
        resource.remove(dropped);
    }

    let service_name = config
        .service_name_override
        .as_deref()
        .filter(|name| !name.is_empty())
        .or_else(|| Some(config.product.as_str()).filter(|p| !p.is_empty()))
        .unwrap_or(DEFAULT_SERVICE_NAME);
    resource.insert("service.name".to_string(), service_name.to_string());

    for (key, value) in [
        ("service.namespace", &config.product),
        ("tenant.id", &config.tenant),
        ("deployment.environment", &config.environment),
    ] {
        if !value.is_empty() {
            resource.insert(key.to_string(), value.clone());
        }
    }
    resource
}

/// Maps one structured record.
#[must_use]
pub fn map(record: &StructuredLogRecord, config: &MapperConfig) -> TelemetryRecord {
    let severity = if record.parse_error {
        Severity::Error
    } else {
        Severity::from_status(record.status_code)
    };

    let mut attributes: BTreeMap<String, AttributeValue> = record
        .extra
        .iter()
        .map(|(k, v)| (k.clone(), AttributeValue::from(v.as_str())))
        .collect();

    if let Some(address) = &record.client_address {
        attributes.insert("client.address".to_string(), address.as_str().into());
    }
    if let Some(port) = record.client_port {
        attributes.insert("client.port".to_string(), AttributeValue::Int(port.into()));
    }
    if let Some(method) = &record.method {
        attributes.insert("http.request.method".to_string(), method.as_str().into());
    }
    if let Some(path) = &record.path {
        attributes.insert("url.path".to_string(), path.as_str().into());
    }
    if let Some(status) = record.status_code {
        attributes.insert(
            "http.response.status_code".to_string(),
            AttributeValue::Int(status.into()),
        );
    }
    if let Some(latency) = record.latency_ms {
        attributes.insert(
            "aws.lb.latency_ms".to_string(),
            AttributeValue::Double(latency),
        );
    }
    if !record.parse_error {
        attributes.insert(
            "http.response.body.size".to_string(),
            AttributeValue::Int(i64::try_from(record.bytes_sent).unwrap_or(i64::MAX)),
        );
    }

    for dropped in &config.drop_attributes {
        attributes.remove(dropped);
    }
    // the marker of a malformed line cannot be dropped
    if record.parse_error {
        attributes.insert(
            DECODE_ERROR_ATTRIBUTE.to_string(),
            AttributeValue::Bool(true),
        );
    }

    let time_unix_nano = record
        .timestamp
        .timestamp_nanos_opt()
        .and_then(|ns| u64::try_from(ns).ok())
        .unwrap_or(0);

    TelemetryRecord {
        resource: resource(config),
        time_unix_nano,
        severity_number: severity.number(),
        severity_text: severity.text(),
        body: record.body.clone(),
        attributes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn record(status: Option<u16>) -> StructuredLogRecord {
        let mut extra = BTreeMap::new();
        extra.insert("aws.s3.bucket".to_string(), "logs".to_string());
        extra.insert("user_agent.original".to_string(), "curl/8.0".to_string());
        StructuredLogRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
            client_address: Some("10.1.2.3".to_string()),
            client_port: Some(40000),
            method: Some("GET".to_string()),
            path: Some("/health".to_string()),
            status_code: status,
            latency_ms: Some(1.5),
            bytes_sent: 512,
            extra,
            body: "raw access log line".to_string(),
            parse_error: false,
        }
    }

    fn config() -> MapperConfig {
        MapperConfig {
            tenant: "acme".to_string(),
            environment: "prod".to_string(),
            product: "storefront".to_string(),
            ..MapperConfig::default()
        }
    }

    #[test]
    fn test_severity_ranges() {
        for (status, expected) in [
            (Some(200), (9, "INFO")),
            (Some(304), (9, "INFO")),
            (Some(399), (9, "INFO")),
            (Some(400), (13, "WARN")),
            (Some(404), (13, "WARN")),
            (Some(499), (13, "WARN")),
            (Some(500), (17, "ERROR")),
            (Some(503), (17, "ERROR")),
            (None, (9, "INFO")),
        ] {
            let mapped = map(&record(status), &config());
            assert_eq!(
                (mapped.severity_number, mapped.severity_text),
                expected,
                "status {status:?}"
            );
        }
    }

    #[test]
    fn test_parse_error_record() {
        let mut malformed = record(None);
        malformed.parse_error = true;
        malformed.client_address = None;
        malformed.client_port = None;
        malformed.method = None;
        malformed.path = None;
        malformed.latency_ms = None;

        let mapped = map(&malformed, &config());

        assert_eq!(mapped.severity_number, 17);
        assert_eq!(mapped.severity_text, "ERROR");
        assert_eq!(
            mapped.attributes[DECODE_ERROR_ATTRIBUTE],
            AttributeValue::Bool(true)
        );
        assert!(!mapped.attributes.contains_key("http.response.body.size"));
        assert_eq!(mapped.body, "raw access log line");
    }

    #[test]
    fn test_resource_attributes() {
        let mapped = map(&record(Some(200)), &config());
        assert_eq!(mapped.resource["service.name"], "storefront");
        assert_eq!(mapped.resource["service.namespace"], "storefront");
        assert_eq!(mapped.resource["tenant.id"], "acme");
        assert_eq!(mapped.resource["deployment.environment"], "prod");

        let mut with_override = config();
        with_override.service_name_override = Some("edge".to_string());
        with_override
            .resource_attributes
            .insert("team".to_string(), "platform".to_string());
        let resource = resource(&with_override);
        assert_eq!(resource["service.name"], "edge");
        assert_eq!(resource["team"], "platform");

        let empty = resource_of_default();
        assert_eq!(empty.len(), 1);
        assert_eq!(empty["service.name"], DEFAULT_SERVICE_NAME);
    }

    fn resource_of_default() -> BTreeMap<String, String> {
        resource(&MapperConfig::default())
    }

    #[test]
    fn test_drop_attributes() {
        let mut dropping = config();
        dropping
            .resource_attributes
            .insert("team".to_string(), "platform".to_string());
        dropping.drop_attributes = vec![
            "user_agent.original".to_string(),
            "team".to_string(),
            "client.port".to_string(),
        ];

        let mapped = map(&record(Some(200)), &dropping);

        assert!(!mapped.attributes.contains_key("user_agent.original"));
        assert!(!mapped.attributes.contains_key("client.port"));
        assert!(!mapped.resource.contains_key("team"));
        assert!(mapped.attributes.contains_key("client.address"));
    }

    #[test]
    fn test_drop_attributes_keeps_identity_and_decode_error() {
        let mut dropping = config();
        dropping.drop_attributes = vec![
            DECODE_ERROR_ATTRIBUTE.to_string(),
            "service.name".to_string(),
            "tenant.id".to_string(),
            "aws.s3.bucket".to_string(),
        ];
        let mut malformed = record(None);
        malformed.parse_error = true;

        let mapped = map(&malformed, &dropping);

        assert_eq!(
            mapped.attributes[DECODE_ERROR_ATTRIBUTE],
            AttributeValue::Bool(true)
        );
        assert!(!mapped.attributes.contains_key("aws.s3.bucket"));
        assert_eq!(mapped.resource["service.name"], "storefront");
        assert_eq!(mapped.resource["tenant.id"], "acme");
    }

    #[test]
    fn test_serialized_shape() {
        let mapped = map(&record(Some(404)), &config());
        let json = serde_json::to_value(&mapped).unwrap();

        assert_eq!(json["timeUnixNano"], "1705312800000000000");
        assert_eq!(json["severityNumber"], 13);
        assert_eq!(json["severityText"], "WARN");
        assert_eq!(json["body"], "raw access log line");
        assert_eq!(json["attributes"]["http.response.status_code"], 404);
        assert_eq!(json["attributes"]["client.address"], "10.1.2.3");
        assert_eq!(json["attributes"]["aws.lb.latency_ms"], 1.5);
        assert_eq!(json["resource"]["tenant.id"], "acme");
    }

    #[test]
    fn test_mapping_is_idempotent() {
        let input = record(Some(502));
        let first = serde_json::to_vec(&map(&input, &config())).unwrap();
        let second = serde_json::to_vec(&map(&input, &config())).unwrap();
        assert_eq!(first, second);
    }

    proptest! {
        #[test]
        fn prop_severity_depends_only_on_status(status in 100u16..600, path in "/[a-z]{0,12}") {
            let mut input = record(Some(status));
            input.path = Some(path);
            let mapped = map(&input, &config());

            let expected = match status {
                0..=399 => 9,
                400..=499 => 13,
                _ => 17,
            };
            prop_assert_eq!(mapped.severity_number, expected);
            prop_assert_eq!(&mapped.body, &input.body);
        }
    }
}
