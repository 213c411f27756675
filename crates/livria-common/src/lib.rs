//! # LIVRIA Common
//!
//! Common utilities, error types, and logging configuration shared by the
//! LIVRIA offline worker and its host.
//!
//! ## Features
//!
//! - Unified host-level error type
//! - Logging configuration and setup
//! - Retry and timeout utilities

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_with_backoff, retry_with_backoff_if, with_timeout, RetryConfig};

/// Unified error type for the worker host.
#[derive(Error, Debug)]
pub enum LivriaError {
    /// Network-related errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Errors raised by a worker event handler.
    #[error("Worker error: {message}")]
    Worker {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout errors.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl LivriaError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a worker error.
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker {
            message: message.into(),
            source: None,
        }
    }

    /// Create a worker error with source.
    pub fn worker_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Worker {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Check if this error is retryable.
    ///
    /// Worker errors are retryable because a failed install is retried as a
    /// whole by the host.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LivriaError::Network { .. }
                | LivriaError::Worker { .. }
                | LivriaError::Timeout(_)
                | LivriaError::Io(_)
        )
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            LivriaError::Network { .. } => "network",
            LivriaError::Worker { .. } => "worker",
            LivriaError::Config { .. } => "config",
            LivriaError::Io(_) => "io",
            LivriaError::Timeout(_) => "timeout",
            LivriaError::NotFound(_) => "not_found",
            LivriaError::InvalidArgument(_) => "invalid_argument",
        }
    }
}

/// Result type alias for host operations.
pub type Result<T> = std::result::Result<T, LivriaError>;
