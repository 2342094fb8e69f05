//! Buffering of serialized telemetry records into delivery batches.
//!
//! Records are appended to the pending [`DeliveryBatch`] until it holds
//! `max_batch_records` records or its JSON array body reaches
//! `max_batch_bytes` bytes. A record that would push a non-empty batch past
//! the byte limit does not fit: the pending batch has to be shipped first.
//! The aggregator only reports fit and fullness; the forwarder decides when to
//! ship and clears the batch once the destination acknowledged it.
//!
//! ```json
//! [{"timeUnixNano":"...","body":"..."},{"timeUnixNano":"...","body":"..."}]
//! ```

use tracing::warn;

use crate::logs::constants;

/// Ordered serialized records forming one outbound request body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryBatch {
    records: Vec<String>,
    byte_size: usize,
}

impl DeliveryBatch {
    fn push(&mut self, record: String) {
        self.byte_size += record.len();
        self.records.push(record);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Length in bytes of [`DeliveryBatch::body`].
    #[must_use]
    pub fn byte_size(&self) -> usize {
        // brackets plus one comma between records
        2 + self.byte_size + self.records.len().saturating_sub(1)
    }

    /// The batch as a JSON array. The batch itself is left untouched.
    #[must_use]
    pub fn body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.byte_size());
        body.push(b'[');
        for (i, record) in self.records.iter().enumerate() {
            if i > 0 {
                body.push(b',');
            }
            body.extend_from_slice(record.as_bytes());
        }
        body.push(b']');
        body
    }

    fn clear(&mut self) {
        self.records.clear();
        self.byte_size = 0;
    }
}

/// Pending batch plus the count and byte thresholds that bound it.
#[derive(Debug, Clone)]
pub struct Aggregator {
    pub(crate) batch: DeliveryBatch,
    pub(crate) max_batch_records: usize,
    pub(crate) max_batch_bytes: usize,
}

impl Default for Aggregator {
    fn default() -> Self {
        Aggregator::new(
            constants::DEFAULT_MAX_BATCH_RECORDS,
            constants::DEFAULT_MAX_BATCH_BYTES,
        )
    }
}

impl Aggregator {
    #[must_use]
    pub fn new(max_batch_records: usize, max_batch_bytes: usize) -> Self {
        Aggregator {
            batch: DeliveryBatch::default(),
            max_batch_records: max_batch_records.max(1),
            max_batch_bytes: max_batch_bytes.max(1),
        }
    }

    /// Appends a serialized record and returns whether the batch is now full.
    pub fn add(&mut self, record: String) -> bool {
        if record.len() + 2 > self.max_batch_bytes {
            warn!(
                "Record of {} bytes exceeds the batch size limit of {} bytes, it will be sent alone",
                record.len(),
                self.max_batch_bytes
            );
        }
        self.batch.push(record);
        self.is_full()
    }

    /// Whether `record` can join the pending batch without its body going
    /// over `max_batch_bytes`. Always true for an empty batch, so an oversized
    /// record still goes out, alone.
    #[must_use]
    pub fn fits(&self, record: &str) -> bool {
        self.batch.is_empty() || self.batch.byte_size() + 1 + record.len() <= self.max_batch_bytes
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.batch.len() >= self.max_batch_records || self.batch.byte_size() >= self.max_batch_bytes
    }

    #[must_use]
    pub fn batch(&self) -> &DeliveryBatch {
        &self.batch
    }

    /// Drops the pending batch, once delivered.
    pub fn clear(&mut self) {
        self.batch.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_log_entry(content: &str) -> String {
        format!("{{\"body\":\"{content}\"}}")
    }

    #[test]
    fn test_aggregator_default() {
        let aggregator = Aggregator::default();
        assert_eq!(
            aggregator.max_batch_records,
            constants::DEFAULT_MAX_BATCH_RECORDS
        );
        assert_eq!(
            aggregator.max_batch_bytes,
            constants::DEFAULT_MAX_BATCH_BYTES
        );
        assert!(aggregator.batch().is_empty());
    }

    #[test]
    fn test_empty_batch_body() {
        let batch = DeliveryBatch::default();
        assert_eq!(batch.body(), b"[]");
        assert_eq!(batch.byte_size(), 2);
    }

    #[test]
    fn test_body_is_json_array() {
        let mut aggregator = Aggregator::new(10, 1_000);
        aggregator.add(create_log_entry("one"));
        aggregator.add(create_log_entry("two"));

        let body = aggregator.batch().body();
        assert_eq!(
            String::from_utf8(body.clone()).unwrap(),
            r#"[{"body":"one"},{"body":"two"}]"#
        );
        assert_eq!(aggregator.batch().byte_size(), body.len());

        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_body_does_not_drain() {
        let mut aggregator = Aggregator::new(10, 1_000);
        aggregator.add(create_log_entry("kept"));

        let _ = aggregator.batch().body();
        assert_eq!(aggregator.batch().len(), 1);

        aggregator.clear();
        assert!(aggregator.batch().is_empty());
        assert_eq!(aggregator.batch().byte_size(), 2);
    }

    #[test]
    fn test_full_at_exact_record_count() {
        let mut aggregator = Aggregator::new(3, 1_000_000);
        assert!(!aggregator.add(create_log_entry("1")));
        assert!(!aggregator.add(create_log_entry("2")));
        assert!(aggregator.add(create_log_entry("3")));
    }

    #[test]
    fn test_full_at_exact_byte_size() {
        // [r1,r2] where each record is 10 bytes: 2 + 10 + 1 + 10 = 23
        let record = "0123456789".to_string();
        let mut aggregator = Aggregator::new(100, 23);
        assert!(!aggregator.add(record.clone()));
        assert_eq!(aggregator.batch().byte_size(), 12);
        assert!(aggregator.add(record));
        assert_eq!(aggregator.batch().byte_size(), 23);

        let mut aggregator = Aggregator::new(100, 24);
        aggregator.add("0123456789".to_string());
        assert!(!aggregator.add("0123456789".to_string()));
    }

    #[test]
    fn test_fits_checks_byte_limit_before_adding() {
        // two 60 byte records would make a 123 byte body
        let record = "x".repeat(60);
        let mut aggregator = Aggregator::new(100, 100);
        assert!(aggregator.fits(&record));
        assert!(!aggregator.add(record.clone()));
        assert!(!aggregator.fits(&record));
        assert_eq!(aggregator.batch().byte_size(), 62);

        // [r1,r2] of 10 byte records is exactly 23 bytes
        let mut aggregator = Aggregator::new(100, 23);
        aggregator.add("0123456789".to_string());
        assert!(aggregator.fits("0123456789"));
        assert!(!aggregator.fits("01234567890"));
    }

    #[test]
    fn test_oversized_record_is_kept() {
        let mut aggregator = Aggregator::new(100, 8);
        assert!(aggregator.fits(&create_log_entry("far too large for the limit")));
        assert!(aggregator.add(create_log_entry("far too large for the limit")));
        assert_eq!(aggregator.batch().len(), 1);
    }
}
