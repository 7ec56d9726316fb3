//! Raw responses and their normalization into envelopes.
//!
//! A transport produces a [`RawResponse`]: the HTTP status plus the parsed
//! JSON body. [`decode_response`] then turns that into a
//! [`ResponseEnvelope`](docapi_core::ResponseEnvelope).

mod decoder;

use std::fmt::Display;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::BodyExt;
use serde_json::Value as JsonValue;

use crate::error::TransportError;

pub use decoder::{UNAUTHENTICATED_MESSAGE, decode_response};

/// Status and parsed body of a completed HTTP exchange.
#[derive(Clone, Debug, PartialEq)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: JsonValue,
}

impl RawResponse {
    pub fn new(status: StatusCode, body: JsonValue) -> Self {
        Self { status, body }
    }

    /// Parse a collected body.
    ///
    /// An empty body is `null`. A body that is not JSON is an error only for
    /// successful statuses; for others it is treated as `null` so the status
    /// alone decides the outcome.
    pub fn from_bytes(status: StatusCode, bytes: &[u8]) -> Result<Self, TransportError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new(status, JsonValue::Null));
        }
        match serde_json::from_slice(bytes) {
            Ok(body) => Ok(Self::new(status, body)),
            Err(_) if !status.is_success() => Ok(Self::new(status, JsonValue::Null)),
            Err(e) => Err(TransportError::Parse {
                message: e.to_string(),
                raw: String::from_utf8_lossy(bytes).into_owned(),
            }),
        }
    }
}

/// Collect an HTTP response body and parse it.
pub async fn read_response<B>(response: http::Response<B>) -> Result<RawResponse, TransportError>
where
    B: hyper::body::Body<Data = Bytes>,
    B::Error: Display,
{
    let (parts, body) = response.into_parts();
    let bytes = body
        .collect()
        .await
        .map_err(|e| TransportError::Request(format!("failed to read response body: {e}")))?
        .to_bytes();
    RawResponse::from_bytes(parts.status, &bytes)
}
