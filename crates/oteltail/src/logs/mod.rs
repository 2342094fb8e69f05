//! Access-log pipeline.
//!
//! ```text
//!   object bytes
//!        │
//!        v
//!   ┌──────────┐
//!   │ Decoder  │  (split lines, parse ALB fields)
//!   └────┬─────┘
//!        │ StructuredLogRecord
//!        v
//!   ┌──────────┐
//!   │  Mapper  │  (resource, severity, attributes)
//!   └────┬─────┘
//!        │ TelemetryRecord
//!        v
//!   ┌──────────┐
//!   │Aggregator│  (count / byte thresholds)
//!   └────┬─────┘
//!        │ DeliveryBatch
//!        v
//!   ┌──────────┐
//!   │ Flusher  │  (POST, retry with backoff)
//!   └──────────┘
//! ```
//!
//! - **[`access_log`]**: tokenizer and field parser for one access-log line
//! - **[`decoder`]**: lazy iterator of structured records over an object
//! - **[`mapper`]**: projection onto OpenTelemetry log records
//! - **[`aggregator`]**: bounded delivery batches
//! - **[`flusher`]**: the batch forwarder and its retry policy

pub mod access_log;
pub mod aggregator;
pub mod constants;
pub mod decoder;
pub mod flusher;
pub mod mapper;
