//! Batching defaults.
//!
//! A batch is shipped as soon as it holds [`DEFAULT_MAX_BATCH_RECORDS`]
//! records or its JSON array body reaches [`DEFAULT_MAX_BATCH_BYTES`],
//! whichever comes first, and always at the end of a source object.

/// Records per batch before a flush is forced.
pub const DEFAULT_MAX_BATCH_RECORDS: usize = 100;

/// Size of the JSON array body, in bytes, before a flush is forced (1 MiB).
pub const DEFAULT_MAX_BATCH_BYTES: usize = 1_024 * 1_024;

/// Attribute set on records whose line did not match the access-log format.
pub const DECODE_ERROR_ATTRIBUTE: &str = "decode_error";
