//! Command client for remote document APIs.
//!
//! Commands are single-key JSON documents (`{"insertOne": {...}}`) posted to
//! `{base_url}/{namespace}/{collection}`. This crate sends them and decodes
//! the replies; the value model, codec and envelopes live in
//! [`docapi_core`].
//!
//! ## Features
//!
//! - HTTP/2 sessions that rotate after a fixed number of requests and drain
//!   gracefully
//! - Pooled HTTP/1.1 fallback
//! - Per-request timeouts, with transport failures folded into the response
//!   envelope as error entries
//! - Static or derived auth tokens, fetched once per client
//! - A paginated `find` cursor
//!
//! ## Example
//!
//! ```ignore
//! use docapi_client::{Command, DataApiClient, FindOptions, doc};
//!
//! let client = DataApiClient::builder("https://db.example.com/api/json/v1")
//!     .token("AstraCS:...")
//!     .build()?;
//!
//! client
//!     .execute_command("ks/users", Command::insert_one(doc! { "name" => "ada" }), None)
//!     .await?;
//!
//! let mut cursor = client.find("ks/users", doc! { "name" => "ada" }, FindOptions::new().limit(10))?;
//! while let Some(user) = cursor.next().await? {
//!     println!("{user:?}");
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `tls` (default): `tls-ring` + `tls-native-roots`
//! - `tls-ring` / `tls-aws-lc`: crypto providers
//! - `tls-native-roots` / `tls-webpki-roots`: root certificates

pub mod auth;
mod builder;
mod client;
pub mod config;
pub mod cursor;
pub mod error;
pub mod request;
pub mod response;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use auth::{StaticToken, TokenProvider, UsernamePasswordToken};
pub use builder::{ClientBuilder, USER_AGENT_VALUE};
pub use client::DataApiClient;
pub use config::CallOptions;
pub use cursor::{CursorState, FindCursor, FindOptions};
pub use error::{ClientBuildError, ClientError, TransportError};
pub use session::{SessionConnection, SessionConnector, SessionManager};
pub use transport::{CommandTransport, HyperSessionConnector, HyperTransport, HyperTransportBuilder, TlsClientConfig};

// Re-export core types that users need
pub use docapi_core::{
    self, ApiError, Command, CommandName, Document, ObjectId, ResponseEnvelope, ServerError,
    ValidationError, Value, WireConvert, collection_path, doc,
};
