//! Error kinds surfaced by the messaging facade and its components.

use std::collections::HashMap;

use thiserror::Error;

/// Arbitrary string-keyed context attached to an error for logging/monitoring.
pub type ErrorContext = HashMap<String, String>;

/// Errors surfaced by the messaging facade, the tenant config cache, and the
/// broker adapters.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// The adapter could not connect (or lost its connection) to the broker.
    #[error("connection error: {message}")]
    ConnectionError {
        /// Human-readable detail.
        message: String,
        /// Arbitrary context (adapter name, endpoint, ...).
        context: ErrorContext,
    },

    /// A publish call failed after the adapter accepted the request.
    #[error("publish error on topic '{topic}' (tenant {tenant:?}): {message}")]
    PublishError {
        /// Logical or physical topic name.
        topic: String,
        /// Tenant the publish was scoped to, if any.
        tenant: Option<String>,
        /// Human-readable detail.
        message: String,
    },

    /// Setting up a consumer failed.
    #[error("consume error on queue '{queue}' (tenant {tenant:?}): {message}")]
    ConsumeError {
        /// Logical or physical queue name.
        queue: String,
        /// Tenant the consume was scoped to, if any.
        tenant: Option<String>,
        /// Human-readable detail.
        message: String,
    },

    /// The requested adapter name has no registered implementation.
    #[error("adapter not found: {0}")]
    AdapterNotFound(String),

    /// Cross-tenant access was attempted, or a tenant context was required
    /// and missing.
    #[error("tenant isolation violation: {0}")]
    TenantIsolationError(String),

    /// Configuration failed to load or validate.
    #[error("config error: {0}")]
    ConfigError(String),

    /// A message or fingerprint input could not be (de)serialized.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl MessagingError {
    /// Build a `ConnectionError` with no extra context.
    pub fn connection(message: impl Into<String>) -> Self {
        MessagingError::ConnectionError {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    /// Build a `ConnectionError` with context entries.
    pub fn connection_with_context(
        message: impl Into<String>,
        context: ErrorContext,
    ) -> Self {
        MessagingError::ConnectionError {
            message: message.into(),
            context,
        }
    }

    /// Build a `PublishError`.
    pub fn publish(
        topic: impl Into<String>,
        tenant: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        MessagingError::PublishError {
            topic: topic.into(),
            tenant,
            message: message.into(),
        }
    }

    /// Build a `ConsumeError`.
    pub fn consume(
        queue: impl Into<String>,
        tenant: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        MessagingError::ConsumeError {
            queue: queue.into(),
            tenant,
            message: message.into(),
        }
    }

    /// Whether this error kind is ever worth retrying by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MessagingError::ConnectionError { .. }
                | MessagingError::PublishError { .. }
                | MessagingError::ConsumeError { .. }
        )
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        MessagingError::SerializationError(err.to_string())
    }
}

/// Result alias used throughout the facade.
pub type MessagingResult<T> = Result<T, MessagingError>;
