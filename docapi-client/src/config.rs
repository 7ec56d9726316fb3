//! Client configuration.
//!
//! - [`CallOptions`]: Per-call timeout and headers
//! - [`defaults`]: Default values used by the builder

mod options;

pub use options::CallOptions;

/// Default configuration values.
pub mod defaults {
    use std::time::Duration;

    /// Request timeout when neither the client nor the call sets one.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Limit on opening a TCP connection.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Requests served by one HTTP/2 session before it is rotated.
    pub const DEFAULT_MAX_REQUESTS_PER_SESSION: u64 = 1000;

    /// Header carrying the bearer token.
    pub const DEFAULT_AUTH_HEADER: &str = "Token";
}
