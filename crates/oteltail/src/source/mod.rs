// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Where access-log objects come from.
//!
//! - **[`event`]**: turns notification payloads into [`LogObjectReference`]s
//! - **[`store`]**: the [`store::ObjectStore`] seam and its implementations
//! - **[`adapter`]**: drives one object through decode, map and forward

pub mod adapter;
pub mod event;
pub mod store;

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::error;

/// Layout of the keys a load balancer writes its access logs under:
/// `AWSLogs/<account>/elasticloadbalancing/<region>/<yyyy>/<mm>/<dd>/<account>_elasticloadbalancing_<region>_app.<name>.<id>_...`
const OBJECT_KEY_PATTERN: &str = r"AWSLogs/(?P<account_id>\d+)/(?P<type>[a-zA-Z0-9_\-]+)/(?P<region>[\w-]+)/(?P<year>\d+)/(?P<month>\d+)/(?P<day>\d+)/\d+_(?:elasticloadbalancing|vpcflowlogs)_\w+-\w+-\d_(?:(?P<lb_type>app|net)\.)?(?P<src>[a-zA-Z0-9\-]+)";

fn object_key_regex() -> Option<&'static Regex> {
    static OBJECT_KEY_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    OBJECT_KEY_REGEX
        .get_or_init(|| match Regex::new(OBJECT_KEY_PATTERN) {
            Ok(regex) => Some(regex),
            Err(e) => {
                error!("Failed to compile object key pattern: {e}");
                None
            }
        })
        .as_ref()
}

/// A log object named by a storage notification. Consumed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogObjectReference {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    /// Event time of the notification, the Unix epoch when it carried none.
    pub created_at: DateTime<Utc>,
    pub region: Option<String>,
}

impl LogObjectReference {
    #[must_use]
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        LogObjectReference {
            bucket: bucket.into(),
            key: key.into(),
            size: 0,
            // the default DateTime<Utc> is the Unix epoch
            created_at: DateTime::<Utc>::default(),
            region: None,
        }
    }

    /// Attributes describing where the records of this object come from.
    ///
    /// Bucket and key are always present. When the key follows the load
    /// balancer layout, the account, region, load balancer type and name found
    /// in it are added as well.
    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("aws.s3.bucket".to_string(), self.bucket.clone());
        labels.insert("aws.s3.key".to_string(), self.key.clone());
        if let Some(region) = &self.region {
            labels.insert("cloud.region".to_string(), region.clone());
        }

        let Some(captures) = object_key_regex().and_then(|re| re.captures(&self.key)) else {
            return labels;
        };

        for (group, label) in [
            ("account_id", "cloud.account.id"),
            ("region", "cloud.region"),
            ("type", "aws.log.type"),
            ("lb_type", "aws.lb.type"),
            ("src", "aws.lb.name"),
        ] {
            if let Some(value) = captures.name(group) {
                labels.insert(label.to_string(), value.as_str().to_string());
            }
        }
        labels
    }
}
