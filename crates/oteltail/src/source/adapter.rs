// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-object pipeline: fetch, decode, map, forward.
//!
//! Each object gets its own [`Forwarder`], so objects never share a batch and
//! a failing object does not hold back records of another one. The whole run
//! is bounded by a deadline; when it passes, whatever is still buffered gets a
//! single best-effort delivery before [`HandleError::Timeout`] is returned.

use std::sync::Arc;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{Config, ForwarderConfig};
use crate::error::{FetchError, HandleError, ProcessError};
use crate::http::HttpPoster;
use crate::logs::decoder::decode;
use crate::logs::flusher::{Counters, Forwarder};
use crate::logs::mapper::map;
use crate::source::event::object_references;
use crate::source::store::{inflate, ObjectStore};
use crate::source::LogObjectReference;

/// Result of a fully processed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectOutcome {
    pub bucket: String,
    pub key: String,
    /// Records decoded from the object, malformed ones included.
    pub records: u64,
    pub counters: Counters,
}

/// Drives objects named by notifications through fetch, decode, map and
/// forward, one object at a time.
pub struct ObjectSourceAdapter {
    store: Arc<dyn ObjectStore>,
    poster: Arc<dyn HttpPoster>,
    config: Arc<Config>,
    forwarder_config: Arc<ForwarderConfig>,
}

impl ObjectSourceAdapter {
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        poster: Arc<dyn HttpPoster>,
        config: Arc<Config>,
    ) -> Self {
        ObjectSourceAdapter {
            forwarder_config: Arc::new(config.forwarder.clone()),
            store,
            poster,
            config,
        }
    }

    /// Processes one object within the configured invocation timeout.
    pub async fn handle(
        &self,
        reference: &LogObjectReference,
    ) -> Result<ObjectOutcome, HandleError> {
        self.handle_until(reference, Instant::now() + self.config.invocation_timeout)
            .await
    }

    /// Processes one object, giving up at `deadline`.
    pub async fn handle_until(
        &self,
        reference: &LogObjectReference,
        deadline: Instant,
    ) -> Result<ObjectOutcome, HandleError> {
        let span = info_span!("object", bucket = %reference.bucket, key = %reference.key);
        self.process_until(reference, deadline)
            .instrument(span)
            .await
    }

    /// Processes every object a notification payload names, in order, within
    /// the configured invocation timeout. Stops at the first failing object.
    pub async fn handle_event(&self, payload: &Value) -> Result<Vec<ObjectOutcome>, HandleError> {
        self.handle_event_until(payload, Instant::now() + self.config.invocation_timeout)
            .await
    }

    /// Same as [`ObjectSourceAdapter::handle_event`], with a single `deadline`
    /// shared by every object of the notification.
    pub async fn handle_event_until(
        &self,
        payload: &Value,
        deadline: Instant,
    ) -> Result<Vec<ObjectOutcome>, HandleError> {
        let references = object_references(payload)?;
        if references.is_empty() {
            debug!("Notification names no object");
        }

        let mut outcomes = Vec::with_capacity(references.len());
        for reference in &references {
            outcomes.push(self.handle_until(reference, deadline).await?);
        }
        Ok(outcomes)
    }

    async fn process_until(
        &self,
        reference: &LogObjectReference,
        deadline: Instant,
    ) -> Result<ObjectOutcome, HandleError> {
        let mut forwarder = Forwarder::new(self.poster.clone(), self.forwarder_config.clone());
        let mut records = 0;
        let mut decode_errors = 0;

        let run = self.process(reference, &mut forwarder, &mut records, &mut decode_errors);
        let result = tokio::time::timeout_at(deadline, run).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("{e}");
                return Err(e);
            }
            Err(_) => {
                warn!(
                    pending = forwarder.pending(),
                    "Deadline reached, flushing buffered records once"
                );
                if let Err(e) = forwarder.final_flush().await {
                    error!("Final flush failed: {e}");
                }
                let counters = forwarder.counters();
                warn!(
                    records,
                    forwarded = counters.forwarded,
                    decode_errors,
                    final_flush_attempts = counters.final_flush_attempts,
                    "Object processing timed out"
                );
                return Err(HandleError::Timeout {
                    bucket: reference.bucket.clone(),
                    key: reference.key.clone(),
                });
            }
        }

        let counters = Counters {
            decode_errors,
            ..forwarder.counters()
        };
        info!(
            records,
            forwarded = counters.forwarded,
            decode_errors = counters.decode_errors,
            delivery_retries = counters.delivery_retries,
            delivery_failed = counters.delivery_failed,
            "Processed object"
        );
        Ok(ObjectOutcome {
            bucket: reference.bucket.clone(),
            key: reference.key.clone(),
            records,
            counters,
        })
    }

    async fn process(
        &self,
        reference: &LogObjectReference,
        forwarder: &mut Forwarder,
        records: &mut u64,
        decode_errors: &mut u64,
    ) -> Result<(), HandleError> {
        let bytes = self
            .fetch(reference)
            .await
            .map_err(|source| HandleError::Fetch {
                bucket: reference.bucket.clone(),
                key: reference.key.clone(),
                source,
            })?;
        debug!("Fetched {} bytes", bytes.len());

        let process_error = |source: ProcessError| HandleError::Process {
            bucket: reference.bucket.clone(),
            key: reference.key.clone(),
            source,
        };

        for record in decode(&bytes, reference).print_log_lines(self.config.print_log_lines) {
            *records += 1;
            if record.parse_error {
                *decode_errors += 1;
            }
            let mapped = map(&record, &self.config.mapper);
            forwarder
                .enqueue(&mapped)
                .await
                .map_err(|e| process_error(e.into()))?;
        }

        // end of object
        forwarder.flush().await.map_err(|e| process_error(e.into()))
    }

    async fn fetch(&self, reference: &LogObjectReference) -> Result<Vec<u8>, FetchError> {
        let timeout = self.config.fetch_timeout;
        let bytes = tokio::time::timeout(timeout, self.store.fetch_object(reference))
            .await
            .map_err(|_| FetchError::Timeout(timeout))??;
        inflate(bytes)
    }
}
