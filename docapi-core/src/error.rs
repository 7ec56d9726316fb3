//! Error types shared between the codec and the command layer.
//!
//! - [`ValidationError`]: Programming errors detected locally, raised immediately
//! - [`ApiError`]: One entry of a response's `errors` array
//! - [`ServerError`]: A completed-but-rejected command

use serde::{Deserialize, Serialize};

use crate::value::Document;

/// Errors raised synchronously for malformed local input.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A tagged identifier did not contain a valid 24-character hex string.
    #[error("invalid reference {value:?}: {reason}")]
    InvalidReference { value: String, reason: String },

    /// A command document did not have exactly one top-level key, or its
    /// payload was not a document.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// A tagged wire value could not be decoded.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl ValidationError {
    pub(crate) fn invalid_reference<V: Into<String>, R: Into<String>>(value: V, reason: R) -> Self {
        ValidationError::InvalidReference {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// A single entry of the response envelope's `errors` array.
///
/// Unknown fields sent by the server (`id`, `family`, `scope`, ...) are kept
/// in [`extra`](ApiError::extra) so they survive into [`ServerError`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub message: String,

    #[serde(rename = "errorCode", default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ApiError {
    /// Create an error entry with only a message.
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            error_code: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Create an error entry with a message and an error code.
    pub fn with_code<S: Into<String>, C: Into<String>>(message: S, code: C) -> Self {
        Self {
            error_code: Some(code.into()),
            ..Self::new(message)
        }
    }
}

/// A command that reached the server and was rejected.
///
/// Carries the command name, every error entry, and the `status` payload of
/// the response, which for multi-document writes describes what did succeed.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error(
    "Command \"{command_name}\" failed with the following errors: {}",
    render_errors(.errors)
)]
pub struct ServerError {
    pub command_name: String,
    pub errors: Vec<ApiError>,
    pub status: Option<Document>,
}

impl ServerError {
    pub fn new<S: Into<String>>(
        command_name: S,
        errors: Vec<ApiError>,
        status: Option<Document>,
    ) -> Self {
        Self {
            command_name: command_name.into(),
            errors,
            status,
        }
    }

    /// Error code of the first entry, if any.
    pub fn error_code(&self) -> Option<&str> {
        self.errors.first().and_then(|e| e.error_code.as_deref())
    }
}

fn render_errors(errors: &[ApiError]) -> String {
    serde_json::to_string(errors).unwrap_or_else(|_| format!("{errors:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Value, doc};

    #[test]
    fn test_server_error_message_contains_command_and_errors() {
        let err = ServerError::new("insertOne", vec![ApiError::new("x")], None);
        let message = err.to_string();
        assert!(message.contains("insertOne"));
        assert!(message.contains("\"x\""));
        assert_eq!(
            message,
            r#"Command "insertOne" failed with the following errors: [{"message":"x"}]"#
        );
    }

    #[test]
    fn test_server_error_keeps_status() {
        let status = doc! { "insertedIds" => vec![Value::from("a")] };
        let err = ServerError::new(
            "insertMany",
            vec![ApiError::with_code("dup", "DOCUMENT_ALREADY_EXISTS")],
            Some(status.clone()),
        );
        assert_eq!(err.status, Some(status));
        assert_eq!(err.error_code(), Some("DOCUMENT_ALREADY_EXISTS"));
    }

    #[test]
    fn test_api_error_keeps_unknown_fields() {
        let json = serde_json::json!({
            "message": "bad filter",
            "errorCode": "INVALID_FILTER_EXPRESSION",
            "family": "REQUEST",
        });
        let err: ApiError = serde_json::from_value(json).unwrap();
        assert_eq!(err.error_code.as_deref(), Some("INVALID_FILTER_EXPRESSION"));
        assert_eq!(err.extra.get("family"), Some(&serde_json::json!("REQUEST")));

        let back = serde_json::to_value(&err).unwrap();
        assert_eq!(back["family"], "REQUEST");
    }

    #[test]
    fn test_api_error_without_message_defaults_to_empty() {
        let err: ApiError = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(err.message.is_empty());
        assert!(err.error_code.is_none());
    }
}
