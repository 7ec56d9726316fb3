//! Client builder.
//!
//! Provides a fluent API for configuring and building a
//! [`DataApiClient`](crate::DataApiClient).

use std::sync::Arc;
use std::time::Duration;

use http::header::{CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Uri};
use rustls::ClientConfig;

use crate::auth::{StaticToken, TokenProvider, UsernamePasswordToken};
use crate::client::{ClientInner, DataApiClient};
use crate::config::defaults::{DEFAULT_AUTH_HEADER, DEFAULT_MAX_REQUESTS_PER_SESSION, DEFAULT_TIMEOUT};
use crate::error::ClientBuildError;
use crate::session::SessionManager;
use crate::transport::{
    CommandTransport, HyperSessionConnector, HyperTransportBuilder, danger_accept_invalid_certs_config,
    default_tls_config,
};

/// Value of the `User-Agent` header.
pub const USER_AGENT_VALUE: &str = concat!("docapi-client/", env!("CARGO_PKG_VERSION"));

/// Builder for creating a [`DataApiClient`].
///
/// # Example
///
/// ```ignore
/// use docapi_client::ClientBuilder;
///
/// let client = ClientBuilder::new("https://db.example.com/api/json/v1")
///     .username_password("cassandra", "cassandra")
///     .feature_flag("Feature-Flag-tables")
///     .build()?;
/// ```
pub struct ClientBuilder {
    /// Base URL, e.g. "http://localhost:8181/v1".
    base_url: String,
    /// Source of the bearer token.
    token_provider: Option<Arc<dyn TokenProvider>>,
    /// Name of the header carrying the token.
    auth_header: String,
    /// Headers sent as `<flag>: true` on every request.
    feature_flags: Vec<String>,
    /// Default timeout for commands.
    timeout: Duration,
    /// Use multiplexed HTTP/2 sessions (true) or the pooled transport (false).
    http2: bool,
    /// Requests per HTTP/2 session before rotation.
    max_requests_per_session: u64,
    /// HTTP/2 keep-alive interval.
    h2_keep_alive_interval: Option<Duration>,
    /// HTTP/2 keep-alive timeout.
    h2_keep_alive_timeout: Option<Duration>,
    /// Custom TLS configuration.
    tls_config: Option<ClientConfig>,
    /// Whether to accept invalid certificates (dangerous!).
    danger_accept_invalid_certs: bool,
    /// Pre-built transport, replacing both built-in ones.
    transport: Option<Arc<dyn CommandTransport>>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("base_url", &self.base_url)
            .field("token_provider", &self.token_provider.is_some())
            .field("auth_header", &self.auth_header)
            .field("feature_flags", &self.feature_flags)
            .field("timeout", &self.timeout)
            .field("http2", &self.http2)
            .field("max_requests_per_session", &self.max_requests_per_session)
            .field("h2_keep_alive_interval", &self.h2_keep_alive_interval)
            .field("h2_keep_alive_timeout", &self.h2_keep_alive_timeout)
            .field("tls_config", &self.tls_config.is_some())
            .field("danger_accept_invalid_certs", &self.danger_accept_invalid_certs)
            .field("transport", &self.transport.is_some())
            .finish()
    }
}

impl ClientBuilder {
    /// Create a new ClientBuilder with the given base URL.
    ///
    /// The base URL must include the scheme and host. Command paths are
    /// appended to it.
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            token_provider: None,
            auth_header: DEFAULT_AUTH_HEADER.to_string(),
            feature_flags: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            http2: true,
            max_requests_per_session: DEFAULT_MAX_REQUESTS_PER_SESSION,
            h2_keep_alive_interval: None,
            h2_keep_alive_timeout: None,
            tls_config: None,
            danger_accept_invalid_certs: false,
            transport: None,
        }
    }

    /// Use a fixed bearer token.
    pub fn token<S: Into<String>>(self, token: S) -> Self {
        self.token_provider(StaticToken::new(token))
    }

    /// Derive the token from a username and password.
    pub fn username_password<U: Into<String>, P: Into<String>>(self, username: U, password: P) -> Self {
        self.token_provider(UsernamePasswordToken::new(username, password))
    }

    /// Use a custom token source. It is called once, on the first command.
    pub fn token_provider<T: TokenProvider>(mut self, provider: T) -> Self {
        self.token_provider = Some(Arc::new(provider));
        self
    }

    /// Set the name of the header carrying the token.
    ///
    /// Default: `Token`.
    pub fn auth_header_name<S: Into<String>>(mut self, name: S) -> Self {
        self.auth_header = name.into();
        self
    }

    /// Send `<flag>: true` on every request.
    pub fn feature_flag<S: Into<String>>(mut self, flag: S) -> Self {
        self.feature_flags.push(flag.into());
        self
    }

    pub fn feature_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.feature_flags.extend(flags.into_iter().map(Into::into));
        self
    }

    /// Set the default timeout for commands.
    ///
    /// Default: 30 seconds. [`CallOptions::timeout`](crate::CallOptions::timeout)
    /// overrides it per call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable HTTP/2 sessions.
    ///
    /// When disabled, commands go through a pooled HTTP/1.1 client.
    /// Default: enabled.
    pub fn http2(mut self, enabled: bool) -> Self {
        self.http2 = enabled;
        self
    }

    /// Set how many requests one HTTP/2 session serves before rotation.
    ///
    /// Default: 1000.
    pub fn max_requests_per_session(mut self, max: u64) -> Self {
        self.max_requests_per_session = max;
        self
    }

    /// Set the HTTP/2 keep-alive interval.
    pub fn h2_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.h2_keep_alive_interval = Some(interval);
        self
    }

    /// Set the HTTP/2 keep-alive timeout.
    ///
    /// Only effective if `h2_keep_alive_interval` is also set.
    pub fn h2_keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.h2_keep_alive_timeout = Some(timeout);
        self
    }

    /// Set a custom TLS configuration.
    pub fn tls_config(mut self, config: ClientConfig) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// Accept invalid TLS certificates.
    ///
    /// # Warning
    ///
    /// This is extremely dangerous and should only be used for development/testing!
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.danger_accept_invalid_certs = true;
        self
    }

    /// Use a custom transport instead of the built-in ones.
    pub fn transport<T: CommandTransport>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<DataApiClient, ClientBuildError> {
        let base_url = validate_base_url(&self.base_url)?;

        // 1. Headers shared by every request
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        for flag in &self.feature_flags {
            let name = HeaderName::try_from(flag.as_str())
                .map_err(|_| ClientBuildError::InvalidHeader(flag.clone()))?;
            headers.insert(name, HeaderValue::from_static("true"));
        }
        let auth_header = HeaderName::try_from(self.auth_header.as_str())
            .map_err(|_| ClientBuildError::InvalidHeader(self.auth_header.clone()))?;

        // 2. Transport
        let transport: Arc<dyn CommandTransport> = match self.transport {
            Some(transport) => transport,
            None => {
                let tls_config = match self.tls_config {
                    _ if self.danger_accept_invalid_certs => danger_accept_invalid_certs_config()?,
                    Some(config) => config,
                    None => default_tls_config()?,
                };
                if self.http2 {
                    let mut connector = HyperSessionConnector::new(tls_config);
                    if let Some(interval) = self.h2_keep_alive_interval {
                        connector = connector.keep_alive_interval(interval);
                    }
                    if let Some(timeout) = self.h2_keep_alive_timeout {
                        connector = connector.keep_alive_timeout(timeout);
                    }
                    Arc::new(
                        SessionManager::new(Arc::new(connector))
                            .max_requests_per_session(self.max_requests_per_session),
                    ) as Arc<dyn CommandTransport>
                } else {
                    Arc::new(HyperTransportBuilder::new().tls_config(tls_config).build()?)
                        as Arc<dyn CommandTransport>
                }
            }
        };

        Ok(DataApiClient::from_inner(ClientInner {
            base_url,
            transport,
            token_provider: self.token_provider,
            token: tokio::sync::OnceCell::new(),
            auth_header,
            headers,
            timeout: self.timeout,
        }))
    }
}

/// Require an absolute http(s) URL and drop any trailing slash.
fn validate_base_url(url: &str) -> Result<String, ClientBuildError> {
    let invalid = |message: &str| ClientBuildError::InvalidBaseUrl {
        url: url.to_string(),
        message: message.to_string(),
    };
    let uri: Uri = url.parse().map_err(|_| invalid("not a valid URL"))?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => return Err(invalid("scheme must be http or https")),
    }
    if uri.authority().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(url.trim_end_matches('/').to_string())
}
