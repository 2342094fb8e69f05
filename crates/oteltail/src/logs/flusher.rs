//! Batch forwarding of telemetry records to the write address.
//!
//! The [`Forwarder`] serializes every enqueued record into the pending
//! [`DeliveryBatch`](crate::logs::aggregator::DeliveryBatch) and POSTs the
//! batch as a JSON array as soon as it is full, or when the caller flushes at
//! the end of an object.
//!
//! # Retry policy
//!
//! - 2xx: delivered, the batch is discarded
//! - 429, 5xx, transport errors, request timeouts: retried with exponential
//!   backoff and full jitter until `max_attempts` attempts were made
//! - any other status: rejected at once, never retried
//!
//! A batch leaves the buffer only once the destination acknowledged it, so a
//! caller that gives up mid-delivery still finds the records there for
//! [`Forwarder::final_flush`].

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, error, warn};
use zstd::stream::write::Encoder;

use crate::config::ForwarderConfig;
use crate::error::{DeliveryError, RetryableFailure};
use crate::http::{HttpPoster, PostResponse, TransportError};
use crate::logs::aggregator::Aggregator;
use crate::logs::mapper::TelemetryRecord;

/// Operator counters of one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Records acknowledged by the destination.
    pub forwarded: u64,
    /// Lines that did not match the access-log format.
    pub decode_errors: u64,
    /// Delivery attempts beyond the first one of each batch.
    pub delivery_retries: u64,
    /// Records whose batch was rejected or ran out of attempts.
    pub delivery_failed: u64,
    /// Best-effort flushes made after the deadline.
    pub final_flush_attempts: u64,
}

enum AttemptError {
    Retryable(RetryableFailure),
    Fatal(DeliveryError),
}

fn classify(response: PostResponse) -> Result<(), AttemptError> {
    match response.status {
        200..=299 => Ok(()),
        429 | 500..=599 => Err(AttemptError::Retryable(RetryableFailure::Status(
            response.status,
        ))),
        status => Err(AttemptError::Fatal(DeliveryError::Rejected {
            status,
            body: response.body,
        })),
    }
}

/// Batches telemetry records and delivers them to the write address.
pub struct Forwarder {
    poster: Arc<dyn HttpPoster>,
    config: Arc<ForwarderConfig>,
    aggregator: Aggregator,
    headers: Vec<(String, String)>,
    counters: Counters,
}

impl Forwarder {
    #[must_use]
    pub fn new(poster: Arc<dyn HttpPoster>, config: Arc<ForwarderConfig>) -> Self {
        let mut headers = config.headers.clone();
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
        if config.compression_level.is_some() {
            headers.push(("Content-Encoding".to_string(), "zstd".to_string()));
        }

        Forwarder {
            aggregator: Aggregator::new(config.max_batch_records, config.max_batch_bytes),
            poster,
            config,
            headers,
            counters: Counters::default(),
        }
    }

    #[must_use]
    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Records waiting for delivery.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.aggregator.batch().len()
    }

    /// Buffers a record, delivering the batch when it becomes full.
    ///
    /// A record that would push the pending batch over the byte limit first
    /// sends the pending batch and then starts a new one. When that delivery
    /// fails the record is abandoned with it.
    pub async fn enqueue(&mut self, record: &TelemetryRecord) -> Result<(), DeliveryError> {
        let serialized =
            serde_json::to_string(record).map_err(|e| DeliveryError::Encode(e.to_string()))?;
        if !self.aggregator.fits(&serialized) {
            if let Err(e) = self.flush().await {
                self.counters.delivery_failed += 1;
                return Err(e);
            }
        }
        if self.aggregator.add(serialized) {
            self.flush().await?;
        }
        Ok(())
    }

    /// Delivers whatever is buffered, retrying as configured.
    pub async fn flush(&mut self) -> Result<(), DeliveryError> {
        if self.aggregator.batch().is_empty() {
            return Ok(());
        }
        let body = self.encode(self.aggregator.batch().body())?;
        let result = self.send_with_retry(&body).await;
        self.settle(result)
    }

    /// One attempt at delivering the buffered records, bounded by the final
    /// flush timeout and never retried.
    pub async fn final_flush(&mut self) -> Result<(), DeliveryError> {
        if self.aggregator.batch().is_empty() {
            return Ok(());
        }
        self.counters.final_flush_attempts += 1;
        let body = self.encode(self.aggregator.batch().body())?;
        let result = match self.attempt(body, self.config.final_flush_timeout).await {
            Ok(()) => Ok(()),
            Err(AttemptError::Fatal(e)) => Err(e),
            Err(AttemptError::Retryable(last)) => {
                Err(DeliveryError::Exhausted { attempts: 1, last })
            }
        };
        self.settle(result)
    }

    fn settle(&mut self, result: Result<(), DeliveryError>) -> Result<(), DeliveryError> {
        let records = self.aggregator.batch().len() as u64;
        self.aggregator.clear();
        match result {
            Ok(()) => {
                self.counters.forwarded += records;
                Ok(())
            }
            Err(e) => {
                self.counters.delivery_failed += records;
                error!("Dropping batch of {records} records: {e}");
                Err(e)
            }
        }
    }

    fn encode(&self, body: Vec<u8>) -> Result<Vec<u8>, DeliveryError> {
        let Some(level) = self.config.compression_level else {
            return Ok(body);
        };
        let compress = || -> std::io::Result<Vec<u8>> {
            let mut encoder = Encoder::new(Vec::new(), level)?;
            encoder.write_all(&body)?;
            encoder.finish()
        };
        compress().map_err(|e| DeliveryError::Encode(format!("zstd: {e}")))
    }

    async fn send_with_retry(&mut self, body: &[u8]) -> Result<(), DeliveryError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let last = match self
                .attempt(body.to_vec(), self.config.request_timeout)
                .await
            {
                Ok(()) => return Ok(()),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Retryable(failure)) => failure,
            };

            if attempts >= max_attempts {
                return Err(DeliveryError::Exhausted { attempts, last });
            }

            let backoff = self.backoff(attempts);
            warn!(
                "Delivery attempt {attempts}/{max_attempts} failed ({last}), retrying in {} ms",
                backoff.as_millis()
            );
            self.counters.delivery_retries += 1;
            tokio::time::sleep(backoff).await;
        }
    }

    async fn attempt(&self, body: Vec<u8>, timeout: Duration) -> Result<(), AttemptError> {
        let time = Instant::now();
        let bytes = body.len();
        let response = tokio::time::timeout(
            timeout,
            self.poster
                .post(&self.config.write_address, &self.headers, body),
        )
        .await;

        match response {
            Err(_) | Ok(Err(TransportError::Timeout)) => {
                Err(AttemptError::Retryable(RetryableFailure::Timeout))
            }
            Ok(Err(TransportError::Other(message))) => Err(AttemptError::Retryable(
                RetryableFailure::Transport(message),
            )),
            Ok(Ok(response)) => {
                let status = response.status;
                classify(response)?;
                debug!(
                    "Delivered {bytes} bytes with status {status} in {} ms",
                    time.elapsed().as_millis()
                );
                Ok(())
            }
        }
    }

    /// Delay before the attempt following attempt number `attempt`, drawn
    /// uniformly between the minimum backoff and the exponential ceiling.
    fn backoff(&self, attempt: u32) -> Duration {
        let min = u64::try_from(self.config.min_backoff.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.config.max_backoff.as_millis()).unwrap_or(u64::MAX);
        let ceiling = min
            .saturating_mul(1_u64 << attempt.saturating_sub(1).min(32))
            .min(max)
            .max(min);
        Duration::from_millis(rand::thread_rng().gen_range(min..=ceiling))
    }
}
