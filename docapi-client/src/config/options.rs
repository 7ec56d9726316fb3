//! Per-command overrides.

use http::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

/// Per-call timeout and extra headers, applied on top of the client
/// defaults.
///
/// # Example
///
/// ```ignore
/// use docapi_client::CallOptions;
/// use std::time::Duration;
///
/// let options = CallOptions::new()
///     .timeout(Duration::from_secs(5))
///     .try_header("x-request-id", "abc-123")
///     .unwrap();
///
/// let envelope = client
///     .execute_command_with_options("ks/users", command, None, options)
///     .await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub(crate) timeout: Option<Duration>,
    pub(crate) headers: HeaderMap,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the client's timeout for this call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add a header for this call.
    ///
    /// Per-call headers replace client headers of the same name, including
    /// the auth header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Like [`header`](Self::header), parsing the name and value.
    ///
    /// Returns `None` if either is not a valid header component.
    pub fn try_header<K, V>(self, name: K, value: V) -> Option<Self>
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
    {
        let name = name.try_into().ok()?;
        let value = value.try_into().ok()?;
        Some(self.header(name, value))
    }
}
