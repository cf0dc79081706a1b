//! Error types for the Azure machine driver.
//!
//! [`CloudError`] is what the REST layer and the resource access layer
//! return. [`MachineError`] is what the orchestrators and the driver facade
//! return; its [`ErrorKind`] is the contract with the calling layer.

use std::fmt;

use thiserror::Error;

/// Backend error codes that signal capacity, SKU or zone allocation problems.
const RESOURCE_EXHAUSTED_CODES: &[&str] = &[
    "AllocationFailed",
    "ZonalAllocationFailed",
    "OverconstrainedAllocationRequest",
    "OverconstrainedZonalAllocationRequest",
    "SkuNotAvailable",
    "QuotaExceeded",
];

/// Backend error code returned when the enclosing resource group is gone.
const RESOURCE_GROUP_NOT_FOUND_CODE: &str = "ResourceGroupNotFound";

/// Errors that can occur while talking to Azure Resource Manager.
#[derive(Error, Debug)]
pub enum CloudError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} {} - {message}", .code.as_deref().unwrap_or("<no code>"))]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
        request_id: Option<String>,
        correlation_id: Option<String>,
    },

    /// A long-running operation reached a terminal, non-successful state.
    #[error("operation finished with status {status}: {} - {message}", .code.as_deref().unwrap_or("<no code>"))]
    OperationFailed {
        status: String,
        code: Option<String>,
        message: String,
    },

    /// Operation timed out.
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// The caller cancelled the request.
    #[error("operation cancelled")]
    Cancelled,

    /// Authentication error.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CloudError {
    /// Backend error code, if the backend reported one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } | Self::OperationFailed { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// HTTP status of the failed response, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether the backend reported the target resource as absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Whether the backend reported the enclosing resource group as absent.
    #[must_use]
    pub fn is_resource_group_not_found(&self) -> bool {
        self.code() == Some(RESOURCE_GROUP_NOT_FOUND_CODE)
    }

    /// Whether the failure is a capacity/SKU/zone allocation problem.
    #[must_use]
    pub fn is_resource_exhausted(&self) -> bool {
        self.code()
            .is_some_and(|code| RESOURCE_EXHAUSTED_CODES.contains(&code))
    }

    /// Request and correlation IDs reported by the backend.
    #[must_use]
    pub fn diagnostics(&self) -> (Option<&str>, Option<&str>) {
        match self {
            Self::Api {
                request_id,
                correlation_id,
                ..
            } => (request_id.as_deref(), correlation_id.as_deref()),
            _ => (None, None),
        }
    }
}

/// Classification of a [`MachineError`] for the calling layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Wrong provider or malformed spec; rejected before any external call.
    InvalidArgument,
    /// The target machine does not exist.
    NotFound,
    /// Unexpected backend or local failure.
    Internal,
    /// Capacity, SKU or zone allocation failure.
    ResourceExhausted,
    /// The request was cancelled or its deadline elapsed.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid_argument"),
            Self::NotFound => write!(f, "not_found"),
            Self::Internal => write!(f, "internal"),
            Self::ResourceExhausted => write!(f, "resource_exhausted"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Errors returned by the machine orchestrators and the driver facade.
#[derive(Error, Debug)]
pub enum MachineError {
    /// Request rejected before any backend call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Machine not found.
    #[error("machine not found: {0}")]
    NotFound(String),

    /// Backend ran out of capacity for the request.
    #[error("resource exhausted: {context}: {source}")]
    ResourceExhausted {
        context: String,
        #[source]
        source: CloudError,
    },

    /// The request was cancelled.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Any other failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MachineError {
    /// Kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Wrap a backend failure with the operation context it happened in.
    pub fn cloud(context: impl Into<String>, err: CloudError) -> Self {
        let context = context.into();
        match err {
            CloudError::Cancelled | CloudError::Timeout(_) => {
                Self::Cancelled(format!("{context}: {err}"))
            }
            err if err.is_resource_exhausted() => Self::ResourceExhausted {
                context,
                source: err,
            },
            err => Self::Internal(format!("{context}: {err}")),
        }
    }
}
