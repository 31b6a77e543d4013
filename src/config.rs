use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{CouchError, Result};
use crate::logger::Logger;
use crate::retry::RetryPolicy;

/// Connection and retry settings for a database.
///
/// Deserializable from JSON; every field except `couch` has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouchConfig {
    /// URL of the database, e.g. `http://localhost:5984/mydb`.
    pub couch: String,
    /// Whether a 404 on a single-document read raises instead of returning nothing.
    pub throw_on_get_not_found: bool,
    /// Whether operations on a [`Couch`](crate::Couch) handle are wrapped in retries.
    pub bind_with_retry: bool,
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    /// Retries for writes of the transaction record itself.
    pub transaction_max_retries: u32,
    pub request_timeout_ms: Option<u64>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Log to stderr when no logger is supplied.
    pub use_console_logger: bool,
}

impl Default for CouchConfig {
    fn default() -> Self {
        Self {
            couch: String::new(),
            throw_on_get_not_found: false,
            bind_with_retry: true,
            max_retries: 3,
            initial_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
            transaction_max_retries: 10,
            request_timeout_ms: None,
            username: None,
            password: None,
            use_console_logger: false,
        }
    }
}

/// Settings that may be changed when re-binding an existing handle.
///
/// Unset fields keep the current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebindOptions {
    pub throw_on_get_not_found: Option<bool>,
    pub bind_with_retry: Option<bool>,
    pub max_retries: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub backoff_factor: Option<f64>,
    pub max_delay_ms: Option<u64>,
    pub transaction_max_retries: Option<u32>,
}

impl CouchConfig {
    pub fn new(couch: impl Into<String>) -> Self {
        Self {
            couch: couch.into(),
            ..Default::default()
        }
    }

    /// Parses a JSON configuration and validates it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: CouchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.couch.trim();
        if url.is_empty() {
            return Err(CouchError::Config("`couch` url is required".to_string()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(CouchError::Config(format!(
                "`couch` must be an http(s) url, got {url}"
            )));
        }
        self.retry_policy().validate()?;
        self.transaction_retry_policy().validate()?;
        Ok(())
    }

    /// The database URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.couch.trim().trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            backoff_factor: self.backoff_factor,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }

    pub fn transaction_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.transaction_max_retries,
            ..self.retry_policy()
        }
    }

    /// The logger to use when the caller did not inject one.
    pub fn default_logger(&self) -> Logger {
        if self.use_console_logger {
            Logger::console()
        } else {
            Logger::facade()
        }
    }

    /// Applies `options` on top of this configuration.
    pub fn rebind(&self, options: &RebindOptions) -> Self {
        let mut config = self.clone();
        if let Some(v) = options.throw_on_get_not_found {
            config.throw_on_get_not_found = v;
        }
        if let Some(v) = options.bind_with_retry {
            config.bind_with_retry = v;
        }
        if let Some(v) = options.max_retries {
            config.max_retries = v;
        }
        if let Some(v) = options.initial_delay_ms {
            config.initial_delay_ms = v;
        }
        if let Some(v) = options.backoff_factor {
            config.backoff_factor = v;
        }
        if let Some(v) = options.max_delay_ms {
            config.max_delay_ms = v;
        }
        if let Some(v) = options.transaction_max_retries {
            config.transaction_max_retries = v;
        }
        config
    }
}
