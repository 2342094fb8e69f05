// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration read from environment-style key/value pairs.
//!
//! Every key may be given bare (`WRITE_ADDRESS`) or with the `OTELTAIL_`
//! namespace (`OTELTAIL_WRITE_ADDRESS`); the namespaced key wins. The parsed
//! [`Config`] is an explicit value handed to each component, nothing reads the
//! environment after start-up.

pub mod log_level;

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::error;

use crate::error::ConfigError;
use crate::logs::constants;
use log_level::LogLevel;

const ENV_NAMESPACE: &str = "OTELTAIL_";

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_MIN_BACKOFF_MS: u64 = 100;
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_INVOCATION_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_FINAL_FLUSH_TIMEOUT_MS: u64 = 2_000;

/// Identity merged into the resource attributes of every telemetry record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapperConfig {
    pub tenant: String,
    pub environment: String,
    pub product: String,
    pub service_name_override: Option<String>,
    /// Extra resource attributes from `RESOURCE_ATTRIBUTES`.
    pub resource_attributes: BTreeMap<String, String>,
    /// Attribute names removed from resource and record attributes.
    pub drop_attributes: Vec<String>,
}

/// Destination, batching thresholds and retry policy of the forwarder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwarderConfig {
    pub write_address: String,
    pub headers: Vec<(String, String)>,
    pub max_batch_records: usize,
    pub max_batch_bytes: usize,
    /// Total delivery attempts per batch, the first one included.
    pub max_attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub request_timeout: Duration,
    pub final_flush_timeout: Duration,
    /// zstd level; `None` sends plain JSON.
    pub compression_level: Option<i32>,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        ForwarderConfig {
            write_address: "http://127.0.0.1:4318/v1/logs".to_string(),
            headers: Vec::new(),
            max_batch_records: constants::DEFAULT_MAX_BATCH_RECORDS,
            max_batch_bytes: constants::DEFAULT_MAX_BATCH_BYTES,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_backoff: Duration::from_millis(DEFAULT_MIN_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            request_timeout: Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS),
            final_flush_timeout: Duration::from_millis(DEFAULT_FINAL_FLUSH_TIMEOUT_MS),
            compression_level: None,
        }
    }
}

/// Where log objects are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectStoreLocation {
    /// `OBJECT_STORE_DIR`: a local directory holding `<bucket>/<key>`.
    Dir(PathBuf),
    /// `OBJECT_STORE_URL`: an HTTP endpoint serving `<bucket>/<key>`.
    Url(reqwest::Url),
}

/// Everything the forwarder reads at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub log_level: LogLevel,
    /// Echo every decoded access-log line at INFO.
    pub print_log_lines: bool,
    pub mapper: MapperConfig,
    pub forwarder: ForwarderConfig,
    pub fetch_timeout: Duration,
    /// Deadline of one notification, fetch and delivery included.
    pub invocation_timeout: Duration,
    pub https_proxy: Option<String>,
    /// `None` when neither `OBJECT_STORE_DIR` nor `OBJECT_STORE_URL` is set.
    pub object_store: Option<ObjectStoreLocation>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: LogLevel::default(),
            print_log_lines: false,
            mapper: MapperConfig::default(),
            forwarder: ForwarderConfig::default(),
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            invocation_timeout: Duration::from_millis(DEFAULT_INVOCATION_TIMEOUT_MS),
            https_proxy: None,
            object_store: None,
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| -> Option<String> {
            lookup(&format!("{ENV_NAMESPACE}{key}"))
                .or_else(|| lookup(key))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let write_address = get("WRITE_ADDRESS").ok_or(ConfigError::Missing("WRITE_ADDRESS"))?;
        validate_url(&write_address)?;

        let log_level = match get("LOG_LEVEL") {
            Some(raw) => LogLevel::from_str(&raw).unwrap_or_else(|e| {
                error!("{e}");
                LogLevel::default()
            }),
            None => LogLevel::default(),
        };

        let defaults = ForwarderConfig::default();
        let forwarder = ForwarderConfig {
            write_address,
            headers: parse_headers(get("WRITE_HEADERS").as_deref().unwrap_or_default())?,
            max_batch_records: parse_or(
                "BATCH_MAX_RECORDS",
                get("BATCH_MAX_RECORDS"),
                defaults.max_batch_records,
            )?
            .max(1),
            max_batch_bytes: parse_or(
                "BATCH_MAX_BYTES",
                get("BATCH_MAX_BYTES"),
                defaults.max_batch_bytes,
            )?
            .max(1),
            max_attempts: parse_or("MAX_ATTEMPTS", get("MAX_ATTEMPTS"), defaults.max_attempts)?
                .max(1),
            min_backoff: millis(
                "RETRY_MIN_BACKOFF_MS",
                get("RETRY_MIN_BACKOFF_MS"),
                DEFAULT_MIN_BACKOFF_MS,
            )?,
            max_backoff: millis(
                "RETRY_MAX_BACKOFF_MS",
                get("RETRY_MAX_BACKOFF_MS"),
                DEFAULT_MAX_BACKOFF_MS,
            )?,
            request_timeout: millis(
                "HTTP_TIMEOUT_MS",
                get("HTTP_TIMEOUT_MS"),
                DEFAULT_HTTP_TIMEOUT_MS,
            )?,
            final_flush_timeout: millis(
                "FINAL_FLUSH_TIMEOUT_MS",
                get("FINAL_FLUSH_TIMEOUT_MS"),
                DEFAULT_FINAL_FLUSH_TIMEOUT_MS,
            )?,
            compression_level: get("COMPRESSION_LEVEL")
                .map(|raw| parse_value("COMPRESSION_LEVEL", &raw))
                .transpose()?,
        };

        let mapper = MapperConfig {
            tenant: get("TENANT").unwrap_or_default(),
            environment: get("ENVIRONMENT").unwrap_or_default(),
            product: get("PRODUCT").unwrap_or_default(),
            service_name_override: get("SERVICE_NAME"),
            resource_attributes: parse_resource_attributes(
                get("RESOURCE_ATTRIBUTES").as_deref().unwrap_or_default(),
            )?,
            drop_attributes: parse_drop_attributes(
                get("DROP_ATTRIBUTES").as_deref().unwrap_or_default(),
            ),
        };

        Ok(Config {
            log_level,
            print_log_lines: get("PRINT_LOG_LINES").is_some_and(|v| parse_bool(&v)),
            mapper,
            forwarder,
            fetch_timeout: millis(
                "FETCH_TIMEOUT_MS",
                get("FETCH_TIMEOUT_MS"),
                DEFAULT_FETCH_TIMEOUT_MS,
            )?,
            invocation_timeout: millis(
                "INVOCATION_TIMEOUT_MS",
                get("INVOCATION_TIMEOUT_MS"),
                DEFAULT_INVOCATION_TIMEOUT_MS,
            )?,
            https_proxy: get("HTTPS_PROXY"),
            object_store: object_store_location(get("OBJECT_STORE_DIR"), get("OBJECT_STORE_URL"))?,
        })
    }
}

/// A directory wins over a URL when both are set.
fn object_store_location(
    dir: Option<String>,
    url: Option<String>,
) -> Result<Option<ObjectStoreLocation>, ConfigError> {
    if let Some(dir) = dir {
        return Ok(Some(ObjectStoreLocation::Dir(PathBuf::from(dir))));
    }
    url.map(|raw| {
        reqwest::Url::parse(&raw)
            .map(ObjectStoreLocation::Url)
            .map_err(|e| ConfigError::Invalid {
                key: "OBJECT_STORE_URL",
                reason: e.to_string(),
            })
    })
    .transpose()
}

fn validate_url(raw: &str) -> Result<(), ConfigError> {
    let url = reqwest::Url::parse(raw).map_err(|e| ConfigError::Invalid {
        key: "WRITE_ADDRESS",
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid {
            key: "WRITE_ADDRESS",
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        reason: format!("{raw:?}: {e}"),
    })
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map_or(Ok(default), |raw| parse_value(key, &raw))
}

fn millis(key: &'static str, raw: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    parse_or(key, raw, default).map(Duration::from_millis)
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Parses `Name:Value` pairs separated by commas.
fn parse_headers(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|kv| !kv.is_empty())
        .map(|kv| match kv.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok((name.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(ConfigError::Invalid {
                key: "WRITE_HEADERS",
                reason: format!("expected Name:Value, got {kv:?}"),
            }),
        })
        .collect()
}

/// Parses a flat `key,value,key,value` list.
fn parse_resource_attributes(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut attributes = BTreeMap::new();
    if raw.is_empty() {
        return Ok(attributes);
    }
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() % 2 != 0 {
        return Err(ConfigError::Invalid {
            key: "RESOURCE_ATTRIBUTES",
            reason: "expected a comma separated list with an even number of entries".to_string(),
        });
    }
    for pair in parts.chunks(2) {
        if pair[0].is_empty() {
            return Err(ConfigError::Invalid {
                key: "RESOURCE_ATTRIBUTES",
                reason: "attribute names must not be empty".to_string(),
            });
        }
        attributes.insert(pair[0].to_string(), pair[1].to_string());
    }
    Ok(attributes)
}

fn parse_drop_attributes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
