//! Status-driven response normalization.

use docapi_core::{ApiError, ResponseEnvelope, ValidationError, api_error_from_wire};
use http::StatusCode;
use serde_json::Value as JsonValue;

use super::RawResponse;

pub const UNAUTHENTICATED_MESSAGE: &str = "UNAUTHENTICATED: Invalid token";

/// Normalize a raw response into `{status, data, errors}`.
///
/// Only a 200 body is decoded. A 401 becomes a single unauthenticated entry.
/// Any other status carries the body's `errors` list if it has one, or a
/// single entry naming the status code.
///
/// # Errors
///
/// Returns a [`ValidationError`] when a 200 body holds a malformed tagged
/// value.
pub fn decode_response(raw: RawResponse) -> Result<ResponseEnvelope, ValidationError> {
    match raw.status {
        StatusCode::OK => ResponseEnvelope::from_wire(raw.body),
        StatusCode::UNAUTHORIZED => Ok(ResponseEnvelope::from_error(ApiError::new(
            UNAUTHENTICATED_MESSAGE,
        ))),
        status => {
            let errors = match raw.body {
                JsonValue::Object(mut body) => match body.remove("errors") {
                    Some(JsonValue::Array(entries)) if !entries.is_empty() => {
                        entries.into_iter().map(api_error_from_wire).collect()
                    }
                    _ => Vec::new(),
                },
                _ => Vec::new(),
            };
            if errors.is_empty() {
                Ok(ResponseEnvelope::from_error(ApiError::new(format!(
                    "Server response received : {}!",
                    status.as_u16()
                ))))
            } else {
                Ok(ResponseEnvelope::from_errors(errors))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docapi_core::Value;
    use serde_json::json;

    #[test]
    fn test_ok_is_decoded() {
        let raw = RawResponse::new(
            StatusCode::OK,
            json!({ "data": { "document": { "_id": { "$objectId": "65f1a2b3c4d5e6f708192a3b" } } } }),
        );
        let envelope = decode_response(raw).unwrap();
        assert!(matches!(
            envelope.document().and_then(|d| d.get("_id")),
            Some(Value::ObjectId(_))
        ));
    }

    #[test]
    fn test_ok_with_errors_keeps_errors() {
        let raw = RawResponse::new(StatusCode::OK, json!({ "errors": [{ "message": "x" }] }));
        let envelope = decode_response(raw).unwrap();
        assert_eq!(envelope.errors, vec![ApiError::new("x")]);
    }

    #[test]
    fn test_unauthorized() {
        let raw = RawResponse::new(StatusCode::UNAUTHORIZED, json!({ "errors": [{ "message": "ignored" }] }));
        let envelope = decode_response(raw).unwrap();
        assert_eq!(envelope.errors, vec![ApiError::new(UNAUTHENTICATED_MESSAGE)]);
    }

    #[test]
    fn test_other_status_without_errors() {
        let raw = RawResponse::new(StatusCode::SERVICE_UNAVAILABLE, JsonValue::Null);
        let envelope = decode_response(raw).unwrap();
        assert_eq!(
            envelope.errors,
            vec![ApiError::new("Server response received : 503!")]
        );
        assert!(envelope.status.is_none());
        assert!(envelope.data.is_none());
    }

    #[test]
    fn test_other_status_with_errors_is_not_decoded() {
        let raw = RawResponse::new(
            StatusCode::BAD_REQUEST,
            json!({
                "errors": [{ "message": "bad", "errorCode": "INVALID_REQUEST" }],
                "data": { "document": { "_id": { "$objectId": "not-an-id" } } },
            }),
        );
        let envelope = decode_response(raw).unwrap();
        assert_eq!(envelope.errors.len(), 1);
        assert_eq!(envelope.errors[0].error_code.as_deref(), Some("INVALID_REQUEST"));
        assert!(envelope.data.is_none());
    }
}
