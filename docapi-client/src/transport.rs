//! HTTP transports for command requests.
//!
//! Two implementations of [`CommandTransport`] ship with the crate:
//!
//! - [`SessionManager`](crate::session::SessionManager): Multiplexed HTTP/2
//!   sessions with request-count rotation (the default)
//! - [`HyperTransport`]: hyper_util's pooled client, used when HTTP/2 is
//!   disabled
//!
//! # Feature Flags
//!
//! TLS support requires enabling the appropriate features:
//!
//! - `tls` (default) - Enables `tls-ring` + `tls-native-roots` for convenience
//! - `tls-ring` / `tls-aws-lc` - Crypto providers
//! - `tls-native-roots` / `tls-webpki-roots` - Root certificates
//!
//! # Example
//!
//! ```ignore
//! use docapi_client::transport::HyperTransportBuilder;
//! use std::time::Duration;
//!
//! let transport = HyperTransportBuilder::new()
//!     .pool_idle_timeout(Duration::from_secs(60))
//!     .build()?;
//! ```

mod connector;
mod http2;
mod hyper;

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::TransportError;
use crate::request::CommandRequest;
use crate::response::RawResponse;

pub use connector::{
    DangerousAcceptAnyCertVerifier, build_http_connector, build_https_connector, danger_accept_invalid_certs_config,
    default_tls_config, has_tls_support,
};
pub use http2::{Http2Connection, HyperSessionConnector};
pub use hyper::{HyperTransport, HyperTransportBuilder};

// Re-export rustls types that users might need for TLS configuration
pub use rustls::ClientConfig as TlsClientConfig;

/// Sends one command request and returns the raw response.
///
/// Implementations own connection management and enforce
/// [`CommandRequest::timeout`].
pub trait CommandTransport: Send + Sync + 'static {
    fn send(&self, request: CommandRequest) -> BoxFuture<'_, Result<RawResponse, TransportError>>;

    /// Release connections. Requests sent afterwards may fail.
    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

impl<T: CommandTransport + ?Sized> CommandTransport for Arc<T> {
    fn send(&self, request: CommandRequest) -> BoxFuture<'_, Result<RawResponse, TransportError>> {
        (**self).send(request)
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        (**self).close()
    }
}
