//! Core types for the docapi command client.
//!
//! This crate is pure and performs no I/O. It is shared by the transport
//! crate (`docapi-client`) and by anything that needs to build commands or
//! inspect responses without a network stack.
//!
//! ## Modules
//!
//! - [`value`]: Application-level value model ([`Value`], [`Document`])
//! - [`object_id`]: 12-byte document identifiers
//! - [`codec`]: Encoding to and decoding from the tagged JSON wire format
//! - [`envelope`]: Command and response envelopes
//! - [`error`]: Validation and server error types

pub mod codec;
pub mod envelope;
pub mod error;
pub mod object_id;
pub mod value;

pub use codec::{decode, decode_document, encode, encode_document};
pub use envelope::*;
pub use error::*;
pub use object_id::ObjectId;
pub use value::*;

/// Build a [`Document`] from `key => value` pairs, preserving order.
///
/// ```
/// use docapi_core::{doc, Value};
///
/// let filter = doc! { "name" => "ada", "age" => doc! { "$gt" => 30 } };
/// assert_eq!(filter.get("name"), Some(&Value::from("ada")));
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::Document::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut document = $crate::Document::new();
        $(
            document.insert(::std::string::String::from($key), $crate::Value::from($value));
        )+
        document
    }};
}
