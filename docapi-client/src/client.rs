//! Command executor.
//!
//! This module provides [`DataApiClient`], which turns a [`Command`] into an
//! HTTP POST, sends it on the configured transport and normalizes the reply
//! into a [`ResponseEnvelope`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use docapi_core::{Command, Document, ResponseEnvelope, ServerError, ValidationError};
use http::{HeaderMap, HeaderName, HeaderValue, Uri};
use tokio::sync::OnceCell;
use tracing::{Instrument, error, info_span, warn};

use crate::auth::TokenProvider;
use crate::builder::ClientBuilder;
use crate::config::CallOptions;
use crate::cursor::{FindCursor, FindOptions};
use crate::error::{ClientError, TransportError};
use crate::request::{CommandRequest, encode_body, truncate};
use crate::response::decode_response;
use crate::transport::CommandTransport;

pub(crate) struct ClientInner {
    pub(crate) base_url: String,
    pub(crate) transport: Arc<dyn CommandTransport>,
    pub(crate) token_provider: Option<Arc<dyn TokenProvider>>,
    pub(crate) token: OnceCell<String>,
    pub(crate) auth_header: HeaderName,
    pub(crate) headers: HeaderMap,
    pub(crate) timeout: Duration,
}

/// Client for a remote document API.
///
/// Cheap to clone; clones share the transport and the cached token.
///
/// # Example
///
/// ```ignore
/// use docapi_client::{Command, DataApiClient, doc};
///
/// let client = DataApiClient::builder("http://localhost:8181/v1")
///     .token("AstraCS:...")
///     .build()?;
///
/// let envelope = client
///     .execute_command("ks/users", Command::insert_one(doc! { "name" => "ada" }), None)
///     .await?;
/// ```
#[derive(Clone)]
pub struct DataApiClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for DataApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataApiClient")
            .field("base_url", &self.inner.base_url)
            .field("auth_header", &self.inner.auth_header)
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}

impl DataApiClient {
    /// Create a builder for the given base URL.
    pub fn builder<S: Into<String>>(base_url: S) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    pub(crate) fn from_inner(inner: ClientInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Full URL for a command path such as `ks/users`.
    pub fn url_for(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            self.inner.base_url.clone()
        } else {
            format!("{}/{}", self.inner.base_url, path)
        }
    }

    /// Execute a command and fail on any error entry.
    ///
    /// When `allowed` is given, options outside it are dropped (and logged)
    /// before sending.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Server`] when the envelope carries errors, including
    ///   the synthetic entry for a transport failure
    /// - [`ClientError::Validation`] when the response holds a malformed
    ///   tagged value
    pub async fn execute_command(
        &self,
        path: &str,
        command: Command,
        allowed: Option<&[&str]>,
    ) -> Result<ResponseEnvelope, ClientError> {
        self.execute_command_with_options(path, command, allowed, CallOptions::default())
            .await
    }

    /// Like [`execute_command`](Self::execute_command) with per-call options.
    pub async fn execute_command_with_options(
        &self,
        path: &str,
        command: Command,
        allowed: Option<&[&str]>,
        options: CallOptions,
    ) -> Result<ResponseEnvelope, ClientError> {
        let command_name = command.name.clone();
        let envelope = self
            .send_command_with_options(path, command, allowed, options)
            .await?;
        if envelope.is_error() {
            return Err(ServerError::new(command_name.as_str(), envelope.errors, envelope.status).into());
        }
        Ok(envelope)
    }

    /// Execute a raw single-key command document.
    pub async fn run_command(&self, path: &str, command: Document) -> Result<ResponseEnvelope, ClientError> {
        let command = Command::from_document(command)?;
        self.execute_command(path, command, None).await
    }

    /// Send a command and return its envelope, errors included.
    ///
    /// Transport failures come back as an envelope with one synthetic error
    /// entry rather than as `Err`.
    ///
    /// # Errors
    ///
    /// Only [`ValidationError`] for a malformed value in a 200 response.
    pub async fn send_command(
        &self,
        path: &str,
        command: Command,
        allowed: Option<&[&str]>,
    ) -> Result<ResponseEnvelope, ValidationError> {
        self.send_command_with_options(path, command, allowed, CallOptions::default())
            .await
    }

    /// Like [`send_command`](Self::send_command) with per-call options.
    pub async fn send_command_with_options(
        &self,
        path: &str,
        mut command: Command,
        allowed: Option<&[&str]>,
        options: CallOptions,
    ) -> Result<ResponseEnvelope, ValidationError> {
        let span = info_span!(
            "command.execute",
            command.name = %command.name,
            http.path = %path,
            otel.kind = "client",
        );

        async move {
            // 1. Drop options the command does not accept
            if let Some(allowed) = allowed {
                for key in command.retain_options(allowed) {
                    warn!(command = %command.name, option = %key, "dropping unsupported option");
                }
            }

            // 2. Encode body and build URL
            let body = encode_body(&command);
            let url = self.url_for(path);

            // 3. Headers, including the token
            let request = match self.build_request(&url, body.clone(), options).await {
                Ok(request) => request,
                Err(e) => return Ok(self.transport_failure(&url, &body, e)),
            };

            // 4. Send and normalize
            match self.inner.transport.send(request).await {
                Ok(raw) => decode_response(raw),
                Err(e) => Ok(self.transport_failure(&url, &body, e)),
            }
        }
        .instrument(span)
        .await
    }

    /// Open a cursor over a `find` command.
    pub fn find<P: Into<String>>(
        &self,
        path: P,
        filter: Document,
        options: FindOptions,
    ) -> Result<FindCursor, ClientError> {
        FindCursor::new(self.clone(), path, filter, options)
    }

    /// Close the transport's connections.
    pub async fn close(&self) {
        self.inner.transport.close().await;
    }

    async fn token(&self) -> Result<Option<&str>, TransportError> {
        let Some(provider) = &self.inner.token_provider else {
            return Ok(None);
        };
        let token = self
            .inner
            .token
            .get_or_try_init(|| async {
                provider
                    .token()
                    .await
                    .map_err(|e| TransportError::Auth(e.to_string()))
            })
            .await?;
        Ok(Some(token.as_str()))
    }

    async fn build_request(
        &self,
        url: &str,
        body: Bytes,
        options: CallOptions,
    ) -> Result<CommandRequest, TransportError> {
        let uri: Uri = url
            .parse()
            .map_err(|e| TransportError::Request(format!("invalid url {url:?}: {e}")))?;

        let mut headers = self.inner.headers.clone();
        if let Some(token) = self.token().await? {
            let value = HeaderValue::from_str(token)
                .map_err(|_| TransportError::Auth("token is not a valid header value".to_string()))?;
            headers.insert(self.inner.auth_header.clone(), value);
        }
        let timeout = options.timeout.unwrap_or(self.inner.timeout);
        headers.extend(options.headers);

        Ok(CommandRequest::new(uri, headers, body, timeout))
    }

    fn transport_failure(&self, url: &str, body: &[u8], error: TransportError) -> ResponseEnvelope {
        error!(
            url,
            body = %truncate(&String::from_utf8_lossy(body)),
            error = %error,
            kind = error.kind(),
            "command transport failed"
        );
        ResponseEnvelope::from_error(error.into_api_error())
    }
}
