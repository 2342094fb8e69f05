//! Lazy decoding of an access-log object into structured records.
//!
//! [`decode`] borrows the (already decompressed) object bytes and yields one
//! [`StructuredLogRecord`] per non-blank line. Lines that do not match the
//! access-log format still yield a record, flagged with `parse_error`, so
//! nothing is dropped silently. The decoder performs no I/O.

use std::borrow::Cow;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::logs::access_log::{self, AccessLogEntry};
use crate::source::LogObjectReference;

/// One line of an object, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLogLine<'a> {
    pub text: Cow<'a, str>,
    pub source: &'a LogObjectReference,
    /// Byte offset of the first character of the line in the object.
    pub offset: usize,
    /// 1-based, blank lines included.
    pub line_number: usize,
}

/// A decoded access-log line.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredLogRecord {
    pub timestamp: DateTime<Utc>,
    pub client_address: Option<String>,
    pub client_port: Option<u16>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub status_code: Option<u16>,
    pub latency_ms: Option<f64>,
    pub bytes_sent: u64,
    /// Source labels and the access-log fields without a dedicated member.
    pub extra: BTreeMap<String, String>,
    /// The line exactly as read.
    pub body: String,
    pub parse_error: bool,
}

/// Iterator over the records of one object. Consumed once.
#[derive(Debug)]
pub struct Decoder<'a> {
    bytes: &'a [u8],
    position: usize,
    line_number: usize,
    source: &'a LogObjectReference,
    labels: BTreeMap<String, String>,
    previous: Option<DateTime<Utc>>,
    print_log_lines: bool,
}

/// Starts decoding `bytes`, the content of the object named by `source`.
#[must_use]
pub fn decode<'a>(bytes: &'a [u8], source: &'a LogObjectReference) -> Decoder<'a> {
    Decoder {
        bytes,
        position: 0,
        line_number: 0,
        source,
        labels: source.labels(),
        previous: None,
        print_log_lines: false,
    }
}

impl<'a> Decoder<'a> {
    /// Echo every line at INFO as it is decoded.
    #[must_use]
    pub fn print_log_lines(mut self, enabled: bool) -> Self {
        self.print_log_lines = enabled;
        self
    }

    fn next_line(&mut self) -> Option<RawLogLine<'a>> {
        while self.position < self.bytes.len() {
            let offset = self.position;
            let rest = &self.bytes[offset..];
            let (line, consumed) = match rest.iter().position(|b| *b == b'\n') {
                Some(end) => (&rest[..end], end + 1),
                None => (rest, rest.len()),
            };
            self.position += consumed;
            self.line_number += 1;

            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Some(RawLogLine {
                text: String::from_utf8_lossy(line),
                source: self.source,
                offset,
                line_number: self.line_number,
            });
        }
        None
    }

    /// Timestamps never go backwards within one object.
    fn clamp(&mut self, timestamp: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let clamped = match (timestamp, self.previous) {
            (Some(ts), Some(previous)) => ts.max(previous),
            (Some(ts), None) => ts,
            (None, Some(previous)) => previous,
            (None, None) => self.source.created_at,
        };
        self.previous = Some(clamped);
        clamped
    }

    fn decode_line(&mut self, line: &RawLogLine<'_>) -> StructuredLogRecord {
        if self.print_log_lines {
            info!(target: "access_log", "{}", line.text);
        }

        match access_log::parse_line(&line.text) {
            Ok(entry) => {
                let timestamp = self.clamp(Some(entry.time));
                structured(entry, timestamp, self.labels.clone(), line.text.to_string())
            }
            Err(e) => {
                warn!(
                    bucket = %line.source.bucket,
                    key = %line.source.key,
                    line = line.line_number,
                    offset = line.offset,
                    "Failed to decode access log line: {e}"
                );
                StructuredLogRecord {
                    timestamp: self.clamp(None),
                    client_address: None,
                    client_port: None,
                    method: None,
                    path: None,
                    status_code: None,
                    latency_ms: None,
                    bytes_sent: 0,
                    extra: self.labels.clone(),
                    body: line.text.to_string(),
                    parse_error: true,
                }
            }
        }
    }
}

fn structured(
    entry: AccessLogEntry,
    timestamp: DateTime<Utc>,
    mut extra: BTreeMap<String, String>,
    body: String,
) -> StructuredLogRecord {
    let latency_ms = entry.latency_ms();
    let status_code = entry.status_code();

    extra.insert("aws.lb.request_type".to_string(), entry.request_type);
    extra.insert("aws.lb.id".to_string(), entry.elb);
    extra.insert(
        "aws.lb.received_bytes".to_string(),
        entry.received_bytes.to_string(),
    );
    if let Some(target) = entry.target {
        extra.insert("aws.lb.target".to_string(), target);
    }
    if let Some(status) = entry.target_status_code {
        extra.insert("aws.lb.target_status_code".to_string(), status.to_string());
    }
    if let Some(url) = entry.url {
        extra.insert("url.full".to_string(), url);
    }
    if let Some(protocol) = entry.protocol {
        extra.insert("network.protocol.name".to_string(), protocol);
    }
    for (name, value) in entry.optional {
        extra.insert(name.to_string(), value);
    }

    StructuredLogRecord {
        timestamp,
        client_address: Some(entry.client_address),
        client_port: entry.client_port,
        method: entry.method,
        path: entry.path,
        status_code,
        latency_ms,
        bytes_sent: entry.sent_bytes,
        extra,
        body,
        parse_error: false,
    }
}

impl Iterator for Decoder<'_> {
    type Item = StructuredLogRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let line = self.next_line()?;
        Some(self.decode_line(&line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn line(time: &str, status: &str, path: &str) -> String {
        format!(
            r#"https {time} app/my-lb/50dc6c495c0c9188 192.168.131.39:2817 10.0.0.1:80 0.000 0.001 0.000 {status} {status} 34 366 "GET https://www.example.com:443{path} HTTP/1.1" "curl/7.46.0" ECDHE-RSA-AES128-GCM-SHA256 TLSv1.2 arn:aws:elasticloadbalancing:us-east-2:123456789012:targetgroup/my-targets/73e2d6bc24d8a067 "Root=1-58337262-36d228ad5d99923122bbe354" "www.example.com" "-" 0 {time} "forward" "-" "-" "10.0.0.1:80" "{status}" "-" "-""#
        )
    }

    fn reference() -> LogObjectReference {
        let mut reference = LogObjectReference::new("logs", "alb/a.log");
        reference.created_at = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        reference
    }

    #[test]
    fn test_decode_valid_lines() {
        let source = reference();
        let input = format!(
            "{}\n{}\n",
            line("2024-01-15T10:00:00.000000Z", "200", "/a"),
            line("2024-01-15T10:00:01.000000Z", "503", "/b?q=1"),
        );

        let records: Vec<_> = decode(input.as_bytes(), &source).collect();

        assert_eq!(records.len(), 2);
        let first = &records[0];
        assert!(!first.parse_error);
        assert_eq!(
            first.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
        );
        assert_eq!(first.client_address.as_deref(), Some("192.168.131.39"));
        assert_eq!(first.client_port, Some(2817));
        assert_eq!(first.method.as_deref(), Some("GET"));
        assert_eq!(first.path.as_deref(), Some("/a"));
        assert_eq!(first.status_code, Some(200));
        assert_eq!(first.bytes_sent, 366);
        assert_eq!(first.extra["aws.s3.bucket"], "logs");
        assert_eq!(first.extra["aws.lb.id"], "app/my-lb/50dc6c495c0c9188");
        assert_eq!(first.extra["tls.cipher"], "ECDHE-RSA-AES128-GCM-SHA256");
        assert!(!first.extra.contains_key("aws.lb.redirect_url"));
        assert_eq!(first.body, line("2024-01-15T10:00:00.000000Z", "200", "/a"));

        assert_eq!(records[1].status_code, Some(503));
        assert_eq!(records[1].path.as_deref(), Some("/b"));
    }

    #[test]
    fn test_malformed_line_is_flagged_not_dropped() {
        let source = reference();
        let input = format!(
            "{}\ngarbage line\n{}",
            line("2024-01-15T10:00:00Z", "200", "/"),
            line("2024-01-15T10:00:02Z", "404", "/missing"),
        );

        let records: Vec<_> = decode(input.as_bytes(), &source).collect();

        assert_eq!(records.len(), 3);
        assert!(records[1].parse_error);
        assert_eq!(records[1].body, "garbage line");
        assert_eq!(records[1].timestamp, records[0].timestamp);
        assert_eq!(records[1].extra["aws.s3.key"], "alb/a.log");
        assert!(!records[2].parse_error);
    }

    #[test]
    fn test_first_malformed_line_takes_object_creation_time() {
        let source = reference();
        let records: Vec<_> = decode(b"nope", &source).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, source.created_at);
    }

    #[test]
    fn test_timestamps_are_clamped() {
        let source = reference();
        let input = format!(
            "{}\n{}\n",
            line("2024-01-15T10:00:05Z", "200", "/"),
            line("2024-01-15T10:00:01Z", "200", "/"),
        );

        let records: Vec<_> = decode(input.as_bytes(), &source).collect();

        assert_eq!(records[0].timestamp, records[1].timestamp);
        assert_eq!(
            records[1].timestamp,
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 5).unwrap()
        );
    }

    #[test]
    fn test_line_splitting() {
        let source = reference();
        let valid = line("2024-01-15T10:00:00Z", "200", "/");
        let input = format!("\n{valid}\r\n   \r\n\n{valid}");

        let mut decoder = decode(input.as_bytes(), &source);
        let first = decoder.next_line().unwrap();
        assert_eq!(first.line_number, 2);
        assert_eq!(first.offset, 1);
        assert_eq!(first.text, valid);
        let second = decoder.next_line().unwrap();
        assert_eq!(second.line_number, 5);
        assert!(decoder.next_line().is_none());
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let source = reference();
        let records: Vec<_> = decode(b"abc\xffdef\n", &source).collect();
        assert_eq!(records.len(), 1);
        assert!(records[0].parse_error);
        assert_eq!(records[0].body, "abc\u{FFFD}def");
    }

    #[test]
    fn test_empty_object() {
        let source = reference();
        assert_eq!(decode(b"", &source).count(), 0);
        assert_eq!(decode(b"\n\r\n", &source).count(), 0);
    }

    proptest! {
        // A malformed line never affects how its neighbours decode.
        #[test]
        fn prop_malformed_lines_are_isolated(
            garbage in proptest::collection::vec("[a-z ]{1,40}", 0..5),
            seconds in proptest::collection::vec(0u32..59, 1..5),
        ) {
            let source = reference();
            let valid: Vec<String> = seconds
                .iter()
                .map(|s| line(&format!("2024-01-15T10:00:{s:02}Z"), "200", "/p"))
                .collect();
            let garbage: Vec<&String> = garbage.iter().filter(|g| !g.trim().is_empty()).collect();

            let mut lines: Vec<&str> = Vec::new();
            for (i, v) in valid.iter().enumerate() {
                lines.push(v);
                if let Some(g) = garbage.get(i) {
                    lines.push(g);
                }
            }
            for g in garbage.iter().skip(valid.len()) {
                lines.push(g);
            }
            let input = lines.join("\n");

            let records: Vec<_> = decode(input.as_bytes(), &source).collect();

            prop_assert_eq!(records.len(), lines.len());
            let mut parsed = records.iter().filter(|r| !r.parse_error);
            for v in &valid {
                let record = parsed.next().unwrap();
                prop_assert_eq!(&record.body, v);
                prop_assert_eq!(record.status_code, Some(200));
            }
            prop_assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
            for (record, original) in records.iter().zip(&lines) {
                prop_assert_eq!(record.body.as_str(), *original);
            }
        }
    }
}
