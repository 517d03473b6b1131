//! Error types for the remote master client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to a remote master
#[derive(Debug, Error)]
pub enum ClientError {
    /// Host unreachable, timeout or TLS failure
    #[error("Connection to master failed: {0}")]
    Connectivity(#[source] reqwest::Error),

    /// Master rejected the credentials (401/403)
    #[error("Authentication rejected (status {status}): {message}")]
    Unauthorized {
        /// HTTP status code
        status: u16,
        /// Error message from the master
        message: String,
    },

    /// Master returned any other non-2xx status
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the master
        message: String,
    },

    /// Response body did not have the expected shape
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Request could not be built (bad URL, invalid credential bytes)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::ParseError(err.to_string())
        } else {
            ClientError::Connectivity(err)
        }
    }
}

impl ClientError {
    /// Create an error from a non-2xx status code and response body
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Unauthorized { status, message },
            _ => Self::ApiError { status, message },
        }
    }

    /// HTTP status carried by this error, if the master answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { status, .. } | Self::ApiError { status, .. } => Some(*status),
            Self::Connectivity(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Check if the master rejected the credentials
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Check if the master could not be reached
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::ApiError { status, .. } if *status >= 500)
    }
}
