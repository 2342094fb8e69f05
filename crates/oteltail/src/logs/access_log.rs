//! Application Load Balancer access-log line parser.
//!
//! A line is a space separated list of fields; fields wrapped in double quotes
//! may contain spaces and `\"` escapes. The first thirteen fields are
//! mandatory:
//!
//! ```text
//! type time elb client:port target:port request_processing_time
//! target_processing_time response_processing_time elb_status_code
//! target_status_code received_bytes sent_bytes "request"
//! ```
//!
//! Everything after the request (user agent, TLS details, trace id, ...) is
//! optional and kept as named attributes when present and not `-`.

use chrono::{DateTime, Utc};

/// Request types an ALB writes in the first field.
const REQUEST_TYPES: [&str; 6] = ["http", "https", "h2", "grpcs", "ws", "wss"];

const MANDATORY_FIELDS: usize = 13;

/// Attribute names of the optional fields, in log order starting at field 13.
const OPTIONAL_FIELDS: [&str; 17] = [
    "user_agent.original",
    "tls.cipher",
    "tls.protocol.version",
    "aws.lb.target_group_arn",
    "aws.lb.trace_id",
    "tls.server.name",
    "aws.lb.chosen_cert_arn",
    "aws.lb.matched_rule_priority",
    "aws.lb.request_creation_time",
    "aws.lb.actions_executed",
    "aws.lb.redirect_url",
    "aws.lb.error_reason",
    "aws.lb.target_list",
    "aws.lb.target_status_code_list",
    "aws.lb.classification",
    "aws.lb.classification_reason",
    "aws.lb.conn_trace_id",
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AccessLogParseError {
    #[error("expected at least 13 fields, found {0}")]
    TooFewFields(usize),
    #[error("unterminated quoted field")]
    UnterminatedQuote,
    #[error("unknown request type {0:?}")]
    UnknownRequestType(String),
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("invalid {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
}

/// One parsed access-log line.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessLogEntry {
    pub request_type: String,
    pub time: DateTime<Utc>,
    pub elb: String,
    pub client_address: String,
    pub client_port: Option<u16>,
    pub target: Option<String>,
    pub request_processing_time: f64,
    pub target_processing_time: f64,
    pub response_processing_time: f64,
    pub elb_status_code: Option<u16>,
    pub target_status_code: Option<u16>,
    pub received_bytes: u64,
    pub sent_bytes: u64,
    pub method: Option<String>,
    pub url: Option<String>,
    pub path: Option<String>,
    pub protocol: Option<String>,
    /// Optional trailing fields as `(attribute name, value)`, in log order.
    pub optional: Vec<(&'static str, String)>,
}

impl AccessLogEntry {
    /// Total time spent by the load balancer and the target, in milliseconds.
    ///
    /// ALB writes `-1` for a phase that did not happen (no target reached,
    /// connection closed early); those phases are left out. `None` when no
    /// phase was recorded at all.
    #[must_use]
    pub fn latency_ms(&self) -> Option<f64> {
        let phases = [
            self.request_processing_time,
            self.target_processing_time,
            self.response_processing_time,
        ];
        let recorded: Vec<f64> = phases.into_iter().filter(|t| *t >= 0.0).collect();
        if recorded.is_empty() {
            return None;
        }
        Some(recorded.iter().sum::<f64>() * 1_000.0)
    }

    /// Status returned to the client, or the target's when the load balancer
    /// did not record one.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        self.elb_status_code.or(self.target_status_code)
    }
}

/// Splits a line into fields, unquoting quoted ones.
pub fn tokenize(line: &str) -> Result<Vec<String>, AccessLogParseError> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.peek() == Some(&' ') {
            chars.next();
        }
        let Some(&first) = chars.peek() else {
            break;
        };

        let mut field = String::new();
        if first == '"' {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            field.push(escaped);
                        }
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    _ => field.push(c),
                }
            }
            if !closed {
                return Err(AccessLogParseError::UnterminatedQuote);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ' ' {
                    break;
                }
                field.push(c);
                chars.next();
            }
        }
        fields.push(field);
    }

    Ok(fields)
}

fn optional_value(raw: &str) -> Option<&str> {
    if raw.is_empty() || raw == "-" {
        None
    } else {
        Some(raw)
    }
}

fn parse_status(field: &'static str, raw: &str) -> Result<Option<u16>, AccessLogParseError> {
    match optional_value(raw) {
        None => Ok(None),
        Some(value) => {
            value
                .parse::<u16>()
                .map(Some)
                .map_err(|_| AccessLogParseError::InvalidNumber {
                    field,
                    value: raw.to_string(),
                })
        }
    }
}

fn parse_bytes(field: &'static str, raw: &str) -> Result<u64, AccessLogParseError> {
    match optional_value(raw) {
        None => Ok(0),
        Some(value) => value
            .parse::<u64>()
            .map_err(|_| AccessLogParseError::InvalidNumber {
                field,
                value: raw.to_string(),
            }),
    }
}

fn parse_seconds(field: &'static str, raw: &str) -> Result<f64, AccessLogParseError> {
    match optional_value(raw) {
        None => Ok(-1.0),
        Some(value) => value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| AccessLogParseError::InvalidNumber {
                field,
                value: raw.to_string(),
            }),
    }
}

/// Splits `ip:port` or `[ipv6]:port`.
fn split_host_port(raw: &str) -> (String, Option<u16>) {
    if let Some((host, port)) = raw.rsplit_once(':') {
        if let Ok(port) = port.parse::<u16>() {
            let host = host.trim_start_matches('[').trim_end_matches(']');
            if !host.is_empty() {
                return (host.to_string(), Some(port));
            }
        }
    }
    (raw.to_string(), None)
}

/// Path component of a request URL, without the query string.
fn url_path(url: &str) -> String {
    let without_scheme = match url.find("://") {
        Some(idx) => {
            let rest = &url[idx + 3..];
            match rest.find('/') {
                Some(slash) => &rest[slash..],
                None => "/",
            }
        }
        None => url,
    };
    let path = without_scheme
        .split(['?', '#'])
        .next()
        .unwrap_or(without_scheme);
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

/// Parses one access-log line.
pub fn parse_line(line: &str) -> Result<AccessLogEntry, AccessLogParseError> {
    let fields = tokenize(line)?;
    if fields.len() < MANDATORY_FIELDS {
        return Err(AccessLogParseError::TooFewFields(fields.len()));
    }

    let request_type = fields[0].clone();
    if !REQUEST_TYPES.contains(&request_type.as_str()) {
        return Err(AccessLogParseError::UnknownRequestType(request_type));
    }

    let time = DateTime::parse_from_rfc3339(&fields[1])
        .map_err(|_| AccessLogParseError::InvalidTimestamp(fields[1].clone()))?
        .with_timezone(&Utc);

    let (client_address, client_port) = split_host_port(&fields[3]);
    let target = optional_value(&fields[4]).map(str::to_string);

    let mut request = fields[12].splitn(3, ' ');
    let method = request.next().and_then(optional_value).map(str::to_string);
    let url = request.next().and_then(optional_value).map(str::to_string);
    let protocol = request.next().and_then(optional_value).map(str::to_string);
    let path = url.as_deref().map(url_path);

    let optional = fields[MANDATORY_FIELDS..]
        .iter()
        .zip(OPTIONAL_FIELDS)
        .filter_map(|(raw, name)| optional_value(raw).map(|v| (name, v.to_string())))
        .collect();

    Ok(AccessLogEntry {
        request_type,
        time,
        elb: fields[2].clone(),
        client_address,
        client_port,
        target,
        request_processing_time: parse_seconds("request_processing_time", &fields[5])?,
        target_processing_time: parse_seconds("target_processing_time", &fields[6])?,
        response_processing_time: parse_seconds("response_processing_time", &fields[7])?,
        elb_status_code: parse_status("elb_status_code", &fields[8])?,
        target_status_code: parse_status("target_status_code", &fields[9])?,
        received_bytes: parse_bytes("received_bytes", &fields[10])?,
        sent_bytes: parse_bytes("sent_bytes", &fields[11])?,
        method,
        url,
        path,
        protocol,
        optional,
    })
}
