//! Scripted transport for unit tests.

use std::collections::VecDeque;

use futures::future::BoxFuture;
use http::StatusCode;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::error::TransportError;
use crate::request::CommandRequest;
use crate::response::RawResponse;
use crate::transport::CommandTransport;

/// Replays queued responses in order and records every request.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    requests: Mutex<Vec<CommandRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn with_responses<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = Result<RawResponse, TransportError>>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<CommandRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Bodies of every request, parsed.
    pub(crate) fn bodies(&self) -> Vec<JsonValue> {
        self.requests
            .lock()
            .iter()
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }
}

impl CommandTransport for ScriptedTransport {
    fn send(&self, request: CommandRequest) -> BoxFuture<'_, Result<RawResponse, TransportError>> {
        self.requests.lock().push(request);
        let response = self
            .responses
            .lock()
            .pop_front()
            .unwrap_or(Err(TransportError::Closed));
        Box::pin(async move { response })
    }
}

pub(crate) fn ok(body: JsonValue) -> Result<RawResponse, TransportError> {
    Ok(RawResponse::new(StatusCode::OK, body))
}
