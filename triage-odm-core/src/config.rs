//! Store configuration.
//!
//! Every field has a default, so an empty JSON object is a valid configuration:
//!
//! ```ignore
//! let config = StoreConfig::from_json(r#"{"index_prefix": "howler-", "retry": {"max_attempts": 3}}"#)?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DatastoreError, DatastoreResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Prepended to a model name to form its index name.
    pub index_prefix: String,
    /// Largest `offset + rows` a paginated search may reach.
    pub max_result_window: usize,
    /// Rows returned when a query does not set them.
    pub default_rows: usize,
    /// Documents fetched per scroll round trip.
    pub scroll_page_size: usize,
    /// Reject unknown fields when loading stored documents.
    pub strict: bool,
    /// Bound on one operation including its retries.
    pub timeout_ms: Option<u64>,
    pub retry: RetryConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            index_prefix: String::new(),
            max_result_window: 10_000,
            default_rows: 25,
            scroll_page_size: 1_000,
            strict: false,
            timeout_ms: None,
            retry: RetryConfig::default(),
        }
    }
}

impl StoreConfig {
    /// # Errors
    ///
    /// Returns [`DatastoreError::Initialization`] if the JSON is malformed or a field
    /// has the wrong type.
    pub fn from_json(json: &str) -> DatastoreResult<Self> {
        serde_json::from_str(json)
            .map_err(|err| DatastoreError::Initialization(format!("invalid store configuration: {err}")))
    }

    pub fn index_name(&self, model: &str) -> String {
        format!("{}{model}", self.index_prefix)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 5, initial_backoff_ms: 100, multiplier: 2.0, max_backoff_ms: 10_000 }
    }
}
