use std::time::Duration;

use thiserror::Error;

/// Result type for collector operations
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Errors reported by a management endpoint
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EndpointError {
    /// The endpoint could not be reached
    #[error("connection error: {message}")]
    Connection { message: String },

    /// The call did not complete in time
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The named object is not registered on the endpoint
    #[error("object '{0}' is not registered")]
    ObjectNotFound(String),

    /// The object exists but has no such attribute
    #[error("attribute '{attribute}' not found on '{object}'")]
    AttributeNotFound { object: String, attribute: String },

    /// A remote operation raised an error
    #[error("operation '{operation}' failed on '{object}': {message}")]
    Invocation {
        object: String,
        operation: String,
        message: String,
    },

    /// The endpoint answered with something that could not be understood
    #[error("protocol error: {message}")]
    Protocol { message: String },
}

impl EndpointError {
    /// Whether the same call may succeed at the next cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout(_))
    }
}

/// A method that could not be bound to its receiver.
///
/// Resolution failures are cached by the node that hit them, so the error
/// is cloned every time that node is evaluated again.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot resolve {method}({arguments}) on {receiver}: {reason}")]
pub struct MethodResolutionError {
    pub method: String,
    pub arguments: String,
    pub receiver: String,
    pub reason: String,
}

/// Errors raised while building or running dimension updaters
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Invalid configuration, detected before any live query
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A live query against the endpoint failed
    #[error("failed to query {destination}: {source}")]
    Query {
        destination: String,
        #[source]
        source: EndpointError,
    },

    /// A method of a transform chain could not be resolved
    #[error(transparent)]
    MethodResolution(#[from] MethodResolutionError),

    /// The queried value has a type no store can handle
    #[error("value type '{type_name}' is not supported")]
    TypeNotSupported { type_name: String },

    /// The queried value changed shape after registration
    #[error("unexpected value from {destination}: expected {expected}, found {found}")]
    UnexpectedValue {
        destination: String,
        expected: String,
        found: String,
    },

    /// The caller supplied dimension loader failed
    #[error("failed to get dimension for '{name}': {message}")]
    DimensionLoader { name: String, message: String },

    /// Dynamic updaters only handle absolute and incremental dimensions
    #[error("unhandled dimension algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

impl CollectorError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn query(destination: impl ToString, source: EndpointError) -> Self {
        Self::Query {
            destination: destination.to_string(),
            source,
        }
    }

    /// Whether the updater that raised this error should be kept for the
    /// next cycle.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Query { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}
