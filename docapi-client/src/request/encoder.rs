//! Command body encoding.

use bytes::Bytes;
use docapi_core::Command;

/// Longest body excerpt written to logs and error entries.
pub const MAX_LOGGED_BODY_CHARS: usize = 1000;

/// Serialize a command envelope into a JSON request body.
pub fn encode_body(command: &Command) -> Bytes {
    // Serializing a serde_json::Value cannot fail.
    Bytes::from(command.to_wire().to_string())
}

/// The first [`MAX_LOGGED_BODY_CHARS`] characters of `text`.
pub fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_LOGGED_BODY_CHARS) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docapi_core::{ObjectId, doc};

    #[test]
    fn test_encode_body() {
        let id: ObjectId = "65f1a2b3c4d5e6f708192a3b".parse().unwrap();
        let body = encode_body(&Command::delete_one(doc! { "_id" => id }));
        assert_eq!(
            body,
            Bytes::from_static(
                br#"{"deleteOne":{"filter":{"_id":{"$objectId":"65f1a2b3c4d5e6f708192a3b"}}}}"#
            )
        );
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("short"), "short");

        let long = "é".repeat(MAX_LOGGED_BODY_CHARS + 10);
        let cut = truncate(&long);
        assert_eq!(cut.chars().count(), MAX_LOGGED_BODY_CHARS);
        assert!(long.starts_with(cut));
    }
}
