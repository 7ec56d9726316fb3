//! Command and response envelopes.
//!
//! A command is a single-key document: `{"<commandName>": {payload}}`. The
//! key routes the call and labels any error; the payload carries the
//! `filter`, `update`, `document(s)`, `sort`, `projection` and `options`
//! fields.

use std::fmt;
use std::str::FromStr;

use serde_json::Value as JsonValue;

use crate::codec;
use crate::error::{ApiError, ValidationError};
use crate::value::{Document, Value};

/// Key of the options sub-document inside a command payload.
pub const OPTIONS_KEY: &str = "options";

/// Commands understood by the Data API.
///
/// [`CommandName::Raw`] carries any other name so generic `runCommand`
/// callers are not limited to the known set.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CommandName {
    InsertOne,
    InsertMany,
    UpdateOne,
    UpdateMany,
    DeleteOne,
    DeleteMany,
    Find,
    FindOne,
    FindOneAndReplace,
    FindOneAndUpdate,
    FindOneAndDelete,
    CreateCollection,
    DeleteCollection,
    CreateNamespace,
    DropNamespace,
    FindCollections,
    CountDocuments,
    EstimatedDocumentCount,
    Raw(String),
}

impl CommandName {
    pub fn as_str(&self) -> &str {
        match self {
            CommandName::InsertOne => "insertOne",
            CommandName::InsertMany => "insertMany",
            CommandName::UpdateOne => "updateOne",
            CommandName::UpdateMany => "updateMany",
            CommandName::DeleteOne => "deleteOne",
            CommandName::DeleteMany => "deleteMany",
            CommandName::Find => "find",
            CommandName::FindOne => "findOne",
            CommandName::FindOneAndReplace => "findOneAndReplace",
            CommandName::FindOneAndUpdate => "findOneAndUpdate",
            CommandName::FindOneAndDelete => "findOneAndDelete",
            CommandName::CreateCollection => "createCollection",
            CommandName::DeleteCollection => "deleteCollection",
            CommandName::CreateNamespace => "createNamespace",
            CommandName::DropNamespace => "dropNamespace",
            CommandName::FindCollections => "findCollections",
            CommandName::CountDocuments => "countDocuments",
            CommandName::EstimatedDocumentCount => "estimatedDocumentCount",
            CommandName::Raw(name) => name,
        }
    }
}

impl FromStr for CommandName {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "insertOne" => CommandName::InsertOne,
            "insertMany" => CommandName::InsertMany,
            "updateOne" => CommandName::UpdateOne,
            "updateMany" => CommandName::UpdateMany,
            "deleteOne" => CommandName::DeleteOne,
            "deleteMany" => CommandName::DeleteMany,
            "find" => CommandName::Find,
            "findOne" => CommandName::FindOne,
            "findOneAndReplace" => CommandName::FindOneAndReplace,
            "findOneAndUpdate" => CommandName::FindOneAndUpdate,
            "findOneAndDelete" => CommandName::FindOneAndDelete,
            "createCollection" => CommandName::CreateCollection,
            "deleteCollection" => CommandName::DeleteCollection,
            "createNamespace" => CommandName::CreateNamespace,
            "dropNamespace" => CommandName::DropNamespace,
            "findCollections" => CommandName::FindCollections,
            "countDocuments" => CommandName::CountDocuments,
            "estimatedDocumentCount" => CommandName::EstimatedDocumentCount,
            other => CommandName::Raw(other.to_string()),
        })
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command envelope.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    pub name: CommandName,
    pub payload: Document,
}

impl Command {
    pub fn new(name: CommandName, payload: Document) -> Self {
        Self { name, payload }
    }

    /// Parse a raw single-key command document.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidCommand`] when the document does not
    /// have exactly one top-level key, or when that key's value is not a
    /// document.
    pub fn from_document(document: Document) -> Result<Self, ValidationError> {
        if document.len() != 1 {
            return Err(ValidationError::InvalidCommand(format!(
                "command must have exactly one top-level key, found {}",
                document.len()
            )));
        }
        let Some((key, payload)) = document.into_iter().next() else {
            return Err(ValidationError::InvalidCommand("empty command".to_string()));
        };
        let Ok(name) = key.parse::<CommandName>();
        match payload {
            Value::Document(payload) => Ok(Self::new(name, payload)),
            other => Err(ValidationError::InvalidCommand(format!(
                "payload of \"{name}\" must be a document, got {other:?}"
            ))),
        }
    }

    /// The single-key document form.
    pub fn into_document(self) -> Document {
        let mut document = Document::with_capacity(1);
        document.insert(self.name.as_str().to_string(), Value::Document(self.payload));
        document
    }

    /// The wire body for this command.
    pub fn to_wire(&self) -> JsonValue {
        let mut object = serde_json::Map::with_capacity(1);
        object.insert(
            self.name.as_str().to_string(),
            codec::encode_document(&self.payload),
        );
        JsonValue::Object(object)
    }

    /// The `options` sub-document, if present.
    pub fn options(&self) -> Option<&Document> {
        self.payload.get(OPTIONS_KEY).and_then(Value::as_document)
    }

    /// Drop every option whose key is not in `allowed`, returning the
    /// dropped keys in their original order.
    pub fn retain_options(&mut self, allowed: &[&str]) -> Vec<String> {
        let Some(Value::Document(options)) = self.payload.get_mut(OPTIONS_KEY) else {
            return Vec::new();
        };
        let mut dropped = Vec::new();
        options.retain(|key, _| {
            let keep = allowed.contains(&key.as_str());
            if !keep {
                dropped.push(key.clone());
            }
            keep
        });
        dropped
    }

    pub fn with<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_options(self, options: Document) -> Self {
        self.with(OPTIONS_KEY, options)
    }

    pub fn with_sort(self, sort: Document) -> Self {
        self.with("sort", sort)
    }

    pub fn with_projection(self, projection: Document) -> Self {
        self.with("projection", projection)
    }

    fn filtered(name: CommandName, filter: Document) -> Self {
        Self::new(name, Document::new()).with("filter", filter)
    }

    pub fn insert_one(document: Document) -> Self {
        Self::new(CommandName::InsertOne, Document::new()).with("document", document)
    }

    pub fn insert_many(documents: Vec<Document>) -> Self {
        Self::new(CommandName::InsertMany, Document::new()).with("documents", documents)
    }

    pub fn find(filter: Document) -> Self {
        Self::filtered(CommandName::Find, filter)
    }

    pub fn find_one(filter: Document) -> Self {
        Self::filtered(CommandName::FindOne, filter)
    }

    pub fn update_one(filter: Document, update: Document) -> Self {
        Self::filtered(CommandName::UpdateOne, filter).with("update", update)
    }

    pub fn update_many(filter: Document, update: Document) -> Self {
        Self::filtered(CommandName::UpdateMany, filter).with("update", update)
    }

    pub fn delete_one(filter: Document) -> Self {
        Self::filtered(CommandName::DeleteOne, filter)
    }

    pub fn delete_many(filter: Document) -> Self {
        Self::filtered(CommandName::DeleteMany, filter)
    }

    pub fn find_one_and_replace(filter: Document, replacement: Document) -> Self {
        Self::filtered(CommandName::FindOneAndReplace, filter).with("replacement", replacement)
    }

    pub fn find_one_and_update(filter: Document, update: Document) -> Self {
        Self::filtered(CommandName::FindOneAndUpdate, filter).with("update", update)
    }

    pub fn find_one_and_delete(filter: Document) -> Self {
        Self::filtered(CommandName::FindOneAndDelete, filter)
    }

    pub fn count_documents(filter: Document) -> Self {
        Self::filtered(CommandName::CountDocuments, filter)
    }

    pub fn estimated_document_count() -> Self {
        Self::new(CommandName::EstimatedDocumentCount, Document::new())
    }

    pub fn create_collection<S: Into<String>>(name: S) -> Self {
        Self::new(CommandName::CreateCollection, Document::new()).with("name", name.into())
    }

    pub fn delete_collection<S: Into<String>>(name: S) -> Self {
        Self::new(CommandName::DeleteCollection, Document::new()).with("name", name.into())
    }

    pub fn create_namespace<S: Into<String>>(name: S) -> Self {
        Self::new(CommandName::CreateNamespace, Document::new()).with("name", name.into())
    }

    pub fn drop_namespace<S: Into<String>>(name: S) -> Self {
        Self::new(CommandName::DropNamespace, Document::new()).with("name", name.into())
    }

    pub fn find_collections() -> Self {
        Self::new(CommandName::FindCollections, Document::new())
    }
}

/// Build the request path `<namespace>[/<collection>]`.
pub fn collection_path(namespace: &str, collection: Option<&str>) -> String {
    let namespace = namespace.trim_matches('/');
    match collection {
        Some(collection) => format!("{namespace}/{}", collection.trim_matches('/')),
        None => namespace.to_string(),
    }
}

/// The `data` section of a response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResponseData {
    pub document: Option<Document>,
    pub documents: Option<Vec<Document>>,
    pub next_page_state: Option<String>,
    /// Any other fields of `data`, decoded.
    pub extra: Document,
}

impl ResponseData {
    fn from_wire(wire: JsonValue) -> Result<Self, ValidationError> {
        let mut data = codec::decode_document(wire)?;
        let document = match data.shift_remove("document") {
            Some(Value::Document(document)) => Some(document),
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(ValidationError::InvalidValue(format!(
                    "data.document must be a document, got {other:?}"
                )));
            }
        };
        let documents = match data.shift_remove("documents") {
            Some(Value::Array(items)) => Some(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::Document(document) => Ok(document),
                        other => Err(ValidationError::InvalidValue(format!(
                            "data.documents entries must be documents, got {other:?}"
                        ))),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(ValidationError::InvalidValue(format!(
                    "data.documents must be an array, got {other:?}"
                )));
            }
        };
        let next_page_state = match data.shift_remove("nextPageState") {
            Some(Value::String(token)) => Some(token),
            _ => None,
        };
        Ok(Self {
            document,
            documents,
            next_page_state,
            extra: data,
        })
    }
}

/// A normalized response: `{status?, data?, errors}`.
///
/// Non-empty [`errors`](ResponseEnvelope::errors) always means failure,
/// whatever the HTTP status was.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResponseEnvelope {
    pub status: Option<Document>,
    pub data: Option<ResponseData>,
    pub errors: Vec<ApiError>,
}

impl ResponseEnvelope {
    /// Decode a successful response body. `status` and `data` go through the
    /// codec; `errors` pass through untouched.
    ///
    /// # Errors
    ///
    /// Returns the codec's [`ValidationError`] when a tagged value in
    /// `status` or `data` is malformed.
    pub fn from_wire(wire: JsonValue) -> Result<Self, ValidationError> {
        let JsonValue::Object(mut body) = wire else {
            return Ok(Self::default());
        };

        let errors = match body.remove("errors") {
            Some(JsonValue::Array(entries)) => entries.into_iter().map(api_error_from_wire).collect(),
            _ => Vec::new(),
        };
        let status = match body.remove("status") {
            Some(JsonValue::Null) | None => None,
            Some(status) => Some(codec::decode_document(status)?),
        };
        let data = match body.remove("data") {
            Some(JsonValue::Null) | None => None,
            Some(data) => Some(ResponseData::from_wire(data)?),
        };

        Ok(Self { status, data, errors })
    }

    pub fn from_errors(errors: Vec<ApiError>) -> Self {
        Self {
            errors,
            ..Self::default()
        }
    }

    /// An envelope carrying a single error entry.
    pub fn from_error(error: ApiError) -> Self {
        Self::from_errors(vec![error])
    }

    pub fn is_error(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn document(&self) -> Option<&Document> {
        self.data.as_ref().and_then(|d| d.document.as_ref())
    }

    pub fn documents(&self) -> &[Document] {
        self.data
            .as_ref()
            .and_then(|d| d.documents.as_deref())
            .unwrap_or(&[])
    }

    pub fn next_page_state(&self) -> Option<&str> {
        self.data.as_ref().and_then(|d| d.next_page_state.as_deref())
    }

    /// A field of `status`.
    pub fn status_field(&self, key: &str) -> Option<&Value> {
        self.status.as_ref().and_then(|s| s.get(key))
    }
}

/// Error entries that are not well-formed objects keep their JSON text as
/// the message.
pub fn api_error_from_wire(entry: JsonValue) -> ApiError {
    match serde_json::from_value::<ApiError>(entry.clone()) {
        Ok(error) => error,
        Err(_) => ApiError::new(match entry {
            JsonValue::String(message) => message,
            other => other.to_string(),
        }),
    }
}
