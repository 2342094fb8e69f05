// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # oteltail
//!
//! Ships load balancer access logs from object storage to an OpenTelemetry
//! compatible collector.
//!
//! A storage notification names a freshly written access-log object. The
//! [`source::adapter::ObjectSourceAdapter`] fetches it, the
//! [`logs::decoder`] turns each line into a structured record, the
//! [`logs::mapper`] projects every record onto an OpenTelemetry log record and
//! the [`logs::flusher::Forwarder`] batches them and POSTs them to the
//! configured write address.
//!
//! ```text
//!   notification ──> fetch ──> decode ──> map ──> batch ──> POST
//! ```
//!
//! The object store and the HTTP transport are injected through the
//! [`source::store::ObjectStore`] and [`http::HttpPoster`] traits, so the whole
//! pipeline can run in tests without any cloud collaborator.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

/// Environment driven configuration
pub mod config;

/// Error taxonomy shared by the pipeline stages
pub mod error;

/// HTTP transport used to deliver batches
pub mod http;

/// Log line formatter for the tracing subscriber
pub mod logger;

/// Decoding, mapping and forwarding of access-log records
pub mod logs;

/// Notifications, object stores and the per-object adapter
pub mod source;
