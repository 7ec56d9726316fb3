//! HTTP/2 connections for the session manager.
//!
//! [`HyperSessionConnector`] dials an origin and performs an HTTP/2
//! handshake with `hyper::client::conn::http2`. `https://` origins negotiate
//! `h2` over ALPN; `http://` origins use prior knowledge (h2c). The
//! connection driver runs on its own task and its failures are only logged;
//! callers see them as errors on their requests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::Uri;
use http_body_util::Full;
use hyper::client::conn::http2;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::ClientConfig;
use tokio::task::AbortHandle;
use tower::ServiceExt;

use super::connector::build_https_connector;
use crate::error::TransportError;
use crate::request::CommandRequest;
use crate::response::{RawResponse, read_response};
use crate::session::{SessionConnection, SessionConnector};

/// Opens HTTP/2 connections over TCP or TLS.
#[derive(Clone)]
pub struct HyperSessionConnector {
    https: HttpsConnector<HttpConnector>,
    keep_alive_interval: Option<Duration>,
    keep_alive_timeout: Option<Duration>,
}

impl std::fmt::Debug for HyperSessionConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperSessionConnector")
            .field("keep_alive_interval", &self.keep_alive_interval)
            .field("keep_alive_timeout", &self.keep_alive_timeout)
            .finish_non_exhaustive()
    }
}

impl HyperSessionConnector {
    pub fn new(tls_config: ClientConfig) -> Self {
        Self {
            https: build_https_connector(tls_config, true),
            keep_alive_interval: None,
            keep_alive_timeout: None,
        }
    }

    /// Send HTTP/2 PING frames at this interval.
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = Some(interval);
        self
    }

    /// How long to wait for a PING acknowledgement.
    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = Some(timeout);
        self
    }

    async fn dial(&self, origin: &str) -> Result<Http2Connection, TransportError> {
        let uri: Uri = origin
            .parse()
            .map_err(|e| TransportError::connect(origin, format!("invalid origin: {e}")))?;
        let io = self
            .https
            .clone()
            .oneshot(uri)
            .await
            .map_err(|e| TransportError::connect(origin, e))?;

        let mut builder = http2::Builder::new(TokioExecutor::new());
        builder.timer(TokioTimer::new());
        if let Some(interval) = self.keep_alive_interval {
            builder.keep_alive_interval(interval);
            builder.keep_alive_while_idle(true);
        }
        if let Some(timeout) = self.keep_alive_timeout {
            builder.keep_alive_timeout(timeout);
        }

        let (sender, connection) = builder
            .handshake::<_, Full<Bytes>>(io)
            .await
            .map_err(|e| TransportError::connect(origin, e))?;

        let finished = Arc::new(AtomicBool::new(false));
        let driver_finished = finished.clone();
        let driver_origin = origin.to_string();
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(origin = %driver_origin, error = %e, "http2 connection error");
            }
            driver_finished.store(true, Ordering::Release);
        });

        tracing::debug!(origin, "http2 connection established");
        Ok(Http2Connection {
            sender,
            driver: driver.abort_handle(),
            finished,
        })
    }
}

impl SessionConnector for HyperSessionConnector {
    fn connect<'a>(
        &'a self,
        origin: &'a str,
    ) -> BoxFuture<'a, Result<Arc<dyn SessionConnection>, TransportError>> {
        Box::pin(async move {
            let connection = self.dial(origin).await?;
            Ok(Arc::new(connection) as Arc<dyn SessionConnection>)
        })
    }
}

/// One HTTP/2 connection and its driver task.
pub struct Http2Connection {
    sender: http2::SendRequest<Full<Bytes>>,
    driver: AbortHandle,
    finished: Arc<AtomicBool>,
}

impl std::fmt::Debug for Http2Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http2Connection")
            .field("closed", &SessionConnection::is_closed(self))
            .finish_non_exhaustive()
    }
}

impl SessionConnection for Http2Connection {
    fn send(&self, request: CommandRequest) -> BoxFuture<'static, Result<RawResponse, TransportError>> {
        let mut sender = self.sender.clone();
        Box::pin(async move {
            let request = request.into_http()?;
            sender
                .ready()
                .await
                .map_err(|e| TransportError::Http(e.to_string()))?;
            let response = sender
                .send_request(request)
                .await
                .map_err(|e| TransportError::Request(e.to_string()))?;
            read_response(response).await
        })
    }

    fn is_closed(&self) -> bool {
        self.finished.load(Ordering::Acquire) || self.sender.is_closed()
    }

    fn close(&self) {
        self.driver.abort();
    }
}
