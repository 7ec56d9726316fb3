//! Outgoing command requests.
//!
//! - [`CommandRequest`]: A fully built POST, ready for either transport
//! - [`encode_body`]: Serializes a command envelope through the codec

mod encoder;

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use http_body_util::Full;

use crate::error::TransportError;

pub use encoder::{MAX_LOGGED_BODY_CHARS, encode_body, truncate};

/// A command ready to be sent.
#[derive(Clone, Debug)]
pub struct CommandRequest {
    pub url: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub timeout: Duration,
}

impl CommandRequest {
    pub fn new(url: Uri, headers: HeaderMap, body: Bytes, timeout: Duration) -> Self {
        Self {
            url,
            headers,
            body,
            timeout,
        }
    }

    /// `scheme://authority` of the target. Sessions are keyed by this.
    pub fn origin(&self) -> Result<String, TransportError> {
        match (self.url.scheme_str(), self.url.authority()) {
            (Some(scheme), Some(authority)) => Ok(format!("{scheme}://{authority}")),
            _ => Err(TransportError::Request(format!(
                "url has no origin: {}",
                self.url
            ))),
        }
    }

    /// The body as text.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The body as text, cut to [`MAX_LOGGED_BODY_CHARS`].
    pub fn body_preview(&self) -> String {
        truncate(&String::from_utf8_lossy(&self.body)).to_string()
    }

    /// Convert into an `http::Request`. Every command is a POST.
    pub fn into_http(self) -> Result<http::Request<Full<Bytes>>, TransportError> {
        let mut builder = http::Request::builder().method(Method::POST).uri(self.url);
        if let Some(headers) = builder.headers_mut() {
            *headers = self.headers;
        }
        builder
            .body(Full::new(self.body))
            .map_err(|e| TransportError::Request(e.to_string()))
    }
}
