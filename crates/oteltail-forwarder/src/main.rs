// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::sync::Arc;

use anyhow::{bail, Context};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use oteltail::config::{Config, ObjectStoreLocation};
use oteltail::http::{get_client, ReqwestPoster};
use oteltail::logger::Formatter;
use oteltail::source::adapter::ObjectSourceAdapter;
use oteltail::source::store::{FsObjectStore, HttpObjectStore, ObjectStore};

fn object_store(config: &Config) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match &config.object_store {
        Some(ObjectStoreLocation::Dir(dir)) => {
            debug!("Reading objects from {}", dir.display());
            Ok(Arc::new(FsObjectStore::new(dir.clone())))
        }
        Some(ObjectStoreLocation::Url(base_url)) => {
            debug!("Fetching objects from {base_url}");
            let client = get_client(config.https_proxy.as_deref(), config.fetch_timeout);
            Ok(Arc::new(HttpObjectStore::new(
                client,
                base_url.clone(),
                config.fetch_timeout,
            )))
        }
        None => bail!("either OBJECT_STORE_DIR or OBJECT_STORE_URL must be set"),
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::from_env().context("invalid configuration")?);

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(
            config.log_level.env_filter_directives(),
        )?)
        .event_format(Formatter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    debug!("Logging subsystem enabled");

    let store = object_store(&config)?;
    let poster = Arc::new(ReqwestPoster::new(get_client(
        config.https_proxy.as_deref(),
        config.forwarder.request_timeout,
    )));
    let adapter = ObjectSourceAdapter::new(store, poster, config.clone());

    info!(
        "Forwarding access logs to {}",
        config.forwarder.write_address
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut notifications = 0_usize;
    let mut failures = 0_usize;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        notifications += 1;

        let payload: Value = match serde_json::from_str(&line) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Skipping notification that is not JSON: {e}");
                failures += 1;
                continue;
            }
        };

        match adapter.handle_event(&payload).await {
            Ok(outcomes) => {
                let forwarded: u64 = outcomes.iter().map(|o| o.counters.forwarded).sum();
                debug!(
                    "Notification processed: {} objects, {forwarded} records forwarded",
                    outcomes.len()
                );
            }
            Err(e) => {
                error!("Notification failed: {e}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {notifications} notifications failed");
    }
    info!("Processed {notifications} notifications");
    Ok(())
}
