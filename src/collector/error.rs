//! Collector error taxonomy and classification.
//!
//! Every failure that leaves a collector carries an [`ErrorCategory`]. Errors
//! raised on purpose (entity not found, login rejected) set the category
//! explicitly; anything foreign is classified from its message text by
//! [`classify`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString, IntoStaticStr};
use thiserror::Error;

/// Closed set of error categories, used for logging and as the
/// `error_category` label of `collector_errors_total`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ErrorCategory {
    /// Upstream throttled the request (HTTP 429).
    RateLimit,
    /// Request rejected by upstream, or an unclassified failure.
    ClientError,
    /// Upstream failed internally (HTTP 5xx).
    ServerError,
    /// Endpoint or entity does not exist (HTTP 404).
    NotAvailable,
    /// Operation exceeded its deadline.
    Timeout,
    /// Response could not be decoded.
    Parsing,
    /// Response decoded but violated an expected shape.
    Validation,
    /// Transport-level failure reaching upstream.
    Connection,
    /// Credentials rejected.
    Authentication,
}

impl ErrorCategory {
    /// Map an HTTP status code to a category.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            404 => Self::NotAvailable,
            408 => Self::Timeout,
            429 => Self::RateLimit,
            500..=599 => Self::ServerError,
            _ => Self::ClientError,
        }
    }
}

/// Classify a foreign failure by its description.
///
/// Case-insensitive, first match wins: `timeout`, then
/// `authentication`/`unauthorized`, then `connection`; anything else is a
/// [`ErrorCategory::ClientError`].
pub fn classify(message: &str) -> ErrorCategory {
    let message = message.to_lowercase();
    if message.contains("timeout") {
        ErrorCategory::Timeout
    } else if message.contains("authentication") || message.contains("unauthorized") {
        ErrorCategory::Authentication
    } else if message.contains("connection") {
        ErrorCategory::Connection
    } else {
        ErrorCategory::ClientError
    }
}

/// A categorized collection failure.
#[derive(Debug, Clone, Error)]
pub struct CollectorError {
    category: ErrorCategory,
    message: String,
    collector: Option<String>,
    context: BTreeMap<String, String>,
}

impl CollectorError {
    /// Create an error with an explicit category.
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            collector: None,
            context: BTreeMap::new(),
        }
    }

    /// Wrap a foreign failure, classifying it from its message.
    pub fn foreign(err: impl fmt::Display) -> Self {
        let message = err.to_string();
        Self::new(classify(&message), message)
    }

    /// The upstream endpoint or entity does not exist.
    pub fn not_available(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self::new(
            ErrorCategory::NotAvailable,
            format!("API endpoint not available: {endpoint}"),
        )
        .with_context("endpoint", endpoint)
    }

    /// Upstream rejected the credentials.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Authentication, message)
    }

    /// Upstream data did not have the expected shape.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, message)
    }

    /// The operation ran past its deadline.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Timeout, message)
    }

    /// Attach the name of the collector that raised the error.
    #[must_use]
    pub fn with_collector(mut self, collector: impl Into<String>) -> Self {
        self.collector = Some(collector.into());
        self
    }

    /// Attach a diagnostic key/value pair.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn collector(&self) -> Option<&str> {
        self.collector.as_deref()
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }
}

impl fmt::Display for CollectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.category, self.message)
    }
}

impl From<reqwest::Error> for CollectorError {
    fn from(err: reqwest::Error) -> Self {
        let category = if err.is_timeout() {
            ErrorCategory::Timeout
        } else if err.is_connect() {
            ErrorCategory::Connection
        } else if err.is_decode() {
            ErrorCategory::Parsing
        } else if let Some(status) = err.status() {
            ErrorCategory::from_status(status.as_u16())
        } else {
            classify(&err.to_string())
        };

        let mut error = Self::new(category, err.to_string());
        if let Some(url) = err.url() {
            error = error.with_context("url", url.path());
        }
        error
    }
}

impl From<serde_json::Error> for CollectorError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorCategory::Parsing, err.to_string())
    }
}

impl From<std::io::Error> for CollectorError {
    fn from(err: std::io::Error) -> Self {
        let category = match err.kind() {
            std::io::ErrorKind::TimedOut => ErrorCategory::Timeout,
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected => ErrorCategory::Connection,
            _ => classify(&err.to_string()),
        };
        Self::new(category, err.to_string())
    }
}
