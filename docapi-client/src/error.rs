//! Client-side error types.
//!
//! - [`TransportError`]: A request that never produced a usable response.
//!   The executor folds these into a response envelope instead of returning
//!   them.
//! - [`ClientError`]: What [`DataApiClient::execute_command`] and the
//!   cursor return.
//! - [`ClientBuildError`]: Invalid client configuration.
//!
//! [`DataApiClient::execute_command`]: crate::DataApiClient::execute_command

use std::time::Duration;

use docapi_core::{ApiError, ServerError, ValidationError};

use crate::request::truncate;

/// Error codes attached to synthetic envelope entries, one per kind of
/// transport failure.
pub mod codes {
    pub const CLIENT_TRANSPORT: &str = "CLIENT_TRANSPORT";
    pub const CLIENT_REQUEST: &str = "CLIENT_REQUEST";
    pub const CLIENT_TIMEOUT: &str = "CLIENT_TIMEOUT";
    pub const CLIENT_PARSE: &str = "CLIENT_PARSE";
    pub const CLIENT_AUTH: &str = "CLIENT_AUTH";
}

/// A failure below the command layer.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("failed to connect to {origin}: {message}")]
    Connect { origin: String, message: String },

    /// The request could not be built or the stream failed mid-flight.
    #[error("request failed: {0}")]
    Request(String),

    /// No response within the timeout. Carries the request body.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u128, body: String },

    /// A successful response whose body was not valid JSON.
    #[error("failed to parse response: {message}")]
    Parse { message: String, raw: String },

    /// Protocol-level HTTP failure.
    #[error("http error: {0}")]
    Http(String),

    /// The session or manager was closed.
    #[error("transport closed")]
    Closed,

    /// The bearer token could not be acquired.
    #[error("failed to acquire token: {0}")]
    Auth(String),
}

impl TransportError {
    pub fn timeout(timeout: Duration, body: String) -> Self {
        TransportError::Timeout {
            timeout_ms: timeout.as_millis(),
            body,
        }
    }

    pub fn connect<O: Into<String>, M: ToString>(origin: O, message: M) -> Self {
        TransportError::Connect {
            origin: origin.into(),
            message: message.to_string(),
        }
    }

    /// The `errorCode` used when this error is folded into an envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Connect { .. } | TransportError::Http(_) | TransportError::Closed => {
                codes::CLIENT_TRANSPORT
            }
            TransportError::Request(_) => codes::CLIENT_REQUEST,
            TransportError::Timeout { .. } => codes::CLIENT_TIMEOUT,
            TransportError::Parse { .. } => codes::CLIENT_PARSE,
            TransportError::Auth(_) => codes::CLIENT_AUTH,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }

    /// A synthetic error entry describing this failure.
    pub fn into_api_error(self) -> ApiError {
        let kind = self.kind();
        let mut error = ApiError::with_code(self.to_string(), kind);
        match self {
            TransportError::Timeout { body, .. } => {
                error.extra.insert("body".to_string(), truncate(&body).into());
            }
            TransportError::Parse { raw, .. } => {
                error.extra.insert("raw".to_string(), truncate(&raw).into());
            }
            _ => {}
        }
        error
    }
}

/// Errors returned by the command layer.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ClientError {
    /// The server answered with a non-empty `errors` list.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Local input was malformed, or a response carried a malformed value.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A non-vector sort without a bounded page size.
    #[error("sort requires a limit of at most {max}, got {limit:?}")]
    InvalidSort { limit: Option<u64>, max: u64 },
}

impl ClientError {
    /// The server error, if this is one.
    pub fn as_server_error(&self) -> Option<&ServerError> {
        match self {
            ClientError::Server(error) => Some(error),
            _ => None,
        }
    }
}

/// Invalid client configuration.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClientBuildError {
    #[error("invalid base url {url:?}: {message}")]
    InvalidBaseUrl { url: String, message: String },

    #[error("invalid header {0:?}")]
    InvalidHeader(String),

    #[error("tls configuration error: {0}")]
    Tls(String),
}
