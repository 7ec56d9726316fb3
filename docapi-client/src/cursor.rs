//! Paginated `find` cursor.
//!
//! A [`FindCursor`] fetches one page at a time, following the server's
//! `nextPageState` continuation token. Pages are never prefetched.
//!
//! ```text
//! Uninitialized ──next()──▶ Executing ──page──▶ Initialized ──drained──▶ Executed
//!                              ▲                     │
//!                              └───── next page ─────┘
//! ```

use docapi_core::{Command, Document, Value};
use futures::Stream;

use crate::client::DataApiClient;
use crate::error::ClientError;

/// Options accepted by `find`.
pub const FIND_OPTIONS: &[&str] = &["limit", "skip", "pageState", "includeSimilarity", "includeSortVector"];

/// Largest page a non-vector sort may request.
pub const MAX_SORTED_PAGE_SIZE: u64 = 20;

/// Query options for a [`FindCursor`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindOptions {
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    pub include_similarity: Option<bool>,
    pub include_sort_vector: Option<bool>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn include_similarity(mut self, include: bool) -> Self {
        self.include_similarity = Some(include);
        self
    }

    pub fn include_sort_vector(mut self, include: bool) -> Self {
        self.include_sort_vector = Some(include);
        self
    }

    /// A sort on `$vector` or `$vectorize` is a similarity search and pages
    /// freely. Any other sort must bound its page size.
    fn validate(&self) -> Result<(), ClientError> {
        let Some(sort) = &self.sort else {
            return Ok(());
        };
        if sort.contains_key("$vector") || sort.contains_key("$vectorize") {
            return Ok(());
        }
        match self.limit {
            Some(limit) if limit <= MAX_SORTED_PAGE_SIZE => Ok(()),
            limit => Err(ClientError::InvalidSort {
                limit,
                max: MAX_SORTED_PAGE_SIZE,
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorState {
    Uninitialized,
    Initialized,
    Executing,
    Executed,
}

/// Stateful iterator over the documents matched by a `find`.
pub struct FindCursor {
    client: DataApiClient,
    path: String,
    filter: Document,
    options: FindOptions,
    state: CursorState,
    page: Vec<Document>,
    page_index: usize,
    page_state: Option<String>,
    exhausted: bool,
    returned: u64,
    sort_vector: Option<Vec<f64>>,
    documents: Option<Vec<Document>>,
}

impl std::fmt::Debug for FindCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FindCursor")
            .field("path", &self.path)
            .field("state", &self.state)
            .field("page_len", &self.page.len())
            .field("page_index", &self.page_index)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

impl FindCursor {
    /// Create a cursor. Nothing is sent until the first read.
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidSort`] for a non-vector sort without a limit of
    /// at most [`MAX_SORTED_PAGE_SIZE`].
    pub fn new<P: Into<String>>(
        client: DataApiClient,
        path: P,
        filter: Document,
        options: FindOptions,
    ) -> Result<Self, ClientError> {
        options.validate()?;
        Ok(Self {
            client,
            path: path.into(),
            filter,
            options,
            state: CursorState::Uninitialized,
            page: Vec::new(),
            page_index: 0,
            page_state: None,
            exhausted: false,
            returned: 0,
            sort_vector: None,
            documents: None,
        })
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// The continuation token for the next page, if any.
    pub fn page_state(&self) -> Option<&str> {
        self.page_state.as_deref()
    }

    /// Documents left in the current page.
    pub fn buffered(&self) -> usize {
        self.page.len() - self.page_index
    }

    /// The next document, fetching a page when the current one is drained.
    pub async fn next(&mut self) -> Result<Option<Document>, ClientError> {
        loop {
            if self.state == CursorState::Executed {
                return Ok(None);
            }
            if self.page_index < self.page.len() {
                let document = std::mem::take(&mut self.page[self.page_index]);
                self.page_index += 1;
                return Ok(Some(document));
            }
            if self.exhausted {
                self.state = CursorState::Executed;
                return Ok(None);
            }
            self.get_more().await?;
        }
    }

    /// Every remaining document. Later calls return the same list without
    /// fetching.
    pub async fn to_array(&mut self) -> Result<Vec<Document>, ClientError> {
        if let Some(documents) = &self.documents {
            return Ok(documents.clone());
        }
        let mut documents = Vec::new();
        while let Some(document) = self.next().await? {
            documents.push(document);
        }
        self.documents = Some(documents.clone());
        Ok(documents)
    }

    /// Call `f` on each remaining document.
    pub async fn for_each<F>(&mut self, mut f: F) -> Result<(), ClientError>
    where
        F: FnMut(Document),
    {
        while let Some(document) = self.next().await? {
            f(document);
        }
        Ok(())
    }

    /// Number of remaining documents, via [`to_array`](Self::to_array).
    pub async fn count(&mut self) -> Result<usize, ClientError> {
        Ok(self.to_array().await?.len())
    }

    /// The query vector used by a vector sort, when `include_sort_vector` is
    /// set. Fetches the first page if nothing has been fetched yet.
    pub async fn sort_vector(&mut self) -> Result<Option<&[f64]>, ClientError> {
        if self.state == CursorState::Uninitialized {
            self.get_more().await?;
        }
        Ok(self.sort_vector.as_deref())
    }

    /// Stop the cursor. Later reads return nothing.
    pub fn close(&mut self) {
        self.state = CursorState::Executed;
        self.page.clear();
        self.page_index = 0;
        self.exhausted = true;
    }

    /// Adapt into a [`Stream`]. The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Document, ClientError>> {
        futures::stream::unfold(self, |mut cursor| async move {
            match cursor.next().await {
                Ok(Some(document)) => Some((Ok(document), cursor)),
                Ok(None) => None,
                Err(e) => {
                    cursor.close();
                    Some((Err(e), cursor))
                }
            }
        })
    }

    fn remaining(&self) -> Option<u64> {
        self.options.limit.map(|limit| limit.saturating_sub(self.returned))
    }

    fn build_command(&self) -> Command {
        let mut options = Document::new();
        if let Some(remaining) = self.remaining() {
            options.insert("limit".to_string(), Value::from(remaining));
        }
        if let Some(page_state) = &self.page_state {
            options.insert("pageState".to_string(), Value::from(page_state.as_str()));
        }
        if let Some(skip) = self.options.skip {
            options.insert("skip".to_string(), Value::from(skip));
        }
        if let Some(include) = self.options.include_similarity {
            options.insert("includeSimilarity".to_string(), Value::from(include));
        }
        if let Some(include) = self.options.include_sort_vector {
            options.insert("includeSortVector".to_string(), Value::from(include));
        }

        let mut command = Command::find(self.filter.clone());
        if let Some(sort) = &self.options.sort {
            command = command.with_sort(sort.clone());
        }
        if let Some(projection) = &self.options.projection {
            command = command.with_projection(projection.clone());
        }
        if !options.is_empty() {
            command = command.with_options(options);
        }
        command
    }

    async fn get_more(&mut self) -> Result<(), ClientError> {
        let previous = self.state;
        self.state = CursorState::Executing;

        let result = self
            .client
            .execute_command(&self.path, self.build_command(), Some(FIND_OPTIONS))
            .await;
        let envelope = match result {
            Ok(envelope) => envelope,
            Err(e) => {
                // The page and token are untouched, so the read can be retried.
                self.state = match previous {
                    CursorState::Uninitialized => CursorState::Uninitialized,
                    _ => CursorState::Initialized,
                };
                return Err(e);
            }
        };

        if self.options.include_sort_vector == Some(true) && self.sort_vector.is_none() {
            self.sort_vector = envelope
                .status_field("sortVector")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(Value::as_f64).collect());
        }

        let data = envelope.data.unwrap_or_default();
        let mut page = data.documents.unwrap_or_default();
        if let Some(remaining) = self.remaining() {
            page.truncate(usize::try_from(remaining).unwrap_or(usize::MAX));
        }
        self.returned += page.len() as u64;
        self.page_state = data.next_page_state;
        self.exhausted = self.page_state.is_none()
            || page.is_empty()
            || self.remaining().is_some_and(|remaining| remaining == 0);
        self.page = page;
        self.page_index = 0;
        self.state = CursorState::Initialized;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::testing::{ScriptedTransport, ok};
    use docapi_core::doc;
    use futures::StreamExt;
    use serde_json::{Value as JsonValue, json};
    use std::sync::Arc;

    fn client(transport: &Arc<ScriptedTransport>) -> DataApiClient {
        DataApiClient::builder("http://localhost:8181/v1")
            .transport(transport.clone())
            .build()
            .unwrap()
    }

    fn page(start: usize, len: usize, next: Option<&str>) -> Result<crate::response::RawResponse, TransportError> {
        let documents: Vec<JsonValue> = (start..start + len).map(|n| json!({ "n": n })).collect();
        ok(json!({ "data": { "documents": documents, "nextPageState": next } }))
    }

    #[tokio::test]
    async fn test_pages_are_followed_and_memoized() {
        let transport = Arc::new(ScriptedTransport::with_responses([
            page(0, 20, Some("p1")),
            page(20, 20, Some("p2")),
            page(40, 5, None),
        ]));
        let mut cursor = client(&transport)
            .find("ks/users", doc! { "active" => true }, FindOptions::new())
            .unwrap();

        let documents = cursor.to_array().await.unwrap();
        assert_eq!(documents.len(), 45);
        assert_eq!(documents[44].get("n"), Some(&Value::Int(44)));
        assert_eq!(transport.request_count(), 3);
        assert_eq!(cursor.state(), CursorState::Executed);

        let again = cursor.to_array().await.unwrap();
        assert_eq!(again.len(), 45);
        assert_eq!(cursor.count().await.unwrap(), 45);
        assert_eq!(transport.request_count(), 3);

        let bodies = transport.bodies();
        assert_eq!(bodies[0], json!({ "find": { "filter": { "active": true } } }));
        assert_eq!(bodies[1]["find"]["options"]["pageState"], json!("p1"));
        assert_eq!(bodies[2]["find"]["options"]["pageState"], json!("p2"));
    }

    #[tokio::test]
    async fn test_non_vector_sort_requires_small_limit() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = client(&transport);

        let err = client
            .find("ks/users", doc! {}, FindOptions::new().sort(doc! { "age" => 1 }).limit(25))
            .unwrap_err();
        assert_eq!(err, ClientError::InvalidSort { limit: Some(25), max: 20 });

        let err = client
            .find("ks/users", doc! {}, FindOptions::new().sort(doc! { "age" => 1 }))
            .unwrap_err();
        assert_eq!(err, ClientError::InvalidSort { limit: None, max: 20 });
        assert_eq!(transport.request_count(), 0);

        assert!(client
            .find("ks/users", doc! {}, FindOptions::new().sort(doc! { "age" => 1 }).limit(20))
            .is_ok());
        assert!(client
            .find("ks/users", doc! {}, FindOptions::new().sort(doc! { "$vectorize" => "shoes" }))
            .is_ok());
    }

    #[tokio::test]
    async fn test_options_sent_on_each_page() {
        let transport = Arc::new(ScriptedTransport::with_responses([
            page(0, 2, Some("p1")),
            page(2, 2, None),
        ]));
        let options = FindOptions::new()
            .limit(10)
            .skip(3)
            .sort(doc! { "$vector" => vec![0.1, 0.2] })
            .projection(doc! { "name" => 1 })
            .include_similarity(true);
        let mut cursor = client(&transport).find("ks/users", doc! {}, options).unwrap();
        assert_eq!(cursor.to_array().await.unwrap().len(), 4);

        let bodies = transport.bodies();
        assert_eq!(
            bodies[0],
            json!({
                "find": {
                    "filter": {},
                    "sort": { "$vector": [0.1, 0.2] },
                    "projection": { "name": 1 },
                    "options": { "limit": 10, "skip": 3, "includeSimilarity": true },
                }
            })
        );
        assert_eq!(
            bodies[1]["find"]["options"],
            json!({ "limit": 8, "pageState": "p1", "skip": 3, "includeSimilarity": true })
        );
    }

    #[tokio::test]
    async fn test_limit_stops_paging() {
        let transport = Arc::new(ScriptedTransport::with_responses([
            page(0, 3, Some("p1")),
            page(3, 3, Some("p2")),
        ]));
        let mut cursor = client(&transport)
            .find("ks/users", doc! {}, FindOptions::new().limit(5))
            .unwrap();

        assert_eq!(cursor.to_array().await.unwrap().len(), 5);
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let transport = Arc::new(ScriptedTransport::with_responses([page(0, 2, None)]));
        let mut cursor = client(&transport)
            .find("ks/users", doc! {}, FindOptions::new())
            .unwrap();
        assert_eq!(cursor.state(), CursorState::Uninitialized);

        assert!(cursor.next().await.unwrap().is_some());
        assert_eq!(cursor.state(), CursorState::Initialized);
        assert_eq!(cursor.buffered(), 1);

        // Served from the buffer, no request.
        assert!(cursor.next().await.unwrap().is_some());
        assert_eq!(transport.request_count(), 1);

        assert!(cursor.next().await.unwrap().is_none());
        assert_eq!(cursor.state(), CursorState::Executed);
        assert!(cursor.next().await.unwrap().is_none());
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_close_stops_reads() {
        let transport = Arc::new(ScriptedTransport::with_responses([page(0, 2, Some("p1"))]));
        let mut cursor = client(&transport)
            .find("ks/users", doc! {}, FindOptions::new())
            .unwrap();
        cursor.next().await.unwrap();
        cursor.close();

        assert_eq!(cursor.state(), CursorState::Executed);
        assert!(cursor.next().await.unwrap().is_none());
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_sort_vector_fetches_first_page() {
        let transport = Arc::new(ScriptedTransport::with_responses([ok(json!({
            "status": { "sortVector": [0.25, 0.5] },
            "data": { "documents": [{ "n": 1 }], "nextPageState": null },
        }))]));
        let mut cursor = client(&transport)
            .find(
                "ks/users",
                doc! {},
                FindOptions::new()
                    .sort(doc! { "$vectorize" => "shoes" })
                    .include_sort_vector(true),
            )
            .unwrap();

        assert_eq!(cursor.sort_vector().await.unwrap(), Some(&[0.25, 0.5][..]));
        assert_eq!(transport.request_count(), 1);
        assert_eq!(
            transport.bodies()[0]["find"]["options"],
            json!({ "includeSortVector": true })
        );

        // The fetched page is still served.
        assert_eq!(cursor.to_array().await.unwrap().len(), 1);
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_server_error_surfaces_and_cursor_can_retry() {
        let transport = Arc::new(ScriptedTransport::with_responses([
            ok(json!({ "errors": [{ "message": "overloaded" }] })),
            page(0, 1, None),
        ]));
        let mut cursor = client(&transport)
            .find("ks/users", doc! {}, FindOptions::new())
            .unwrap();

        let err = cursor.next().await.unwrap_err();
        assert!(err.to_string().contains("Command \"find\" failed"));
        assert_eq!(cursor.state(), CursorState::Uninitialized);

        assert!(cursor.next().await.unwrap().is_some());
        assert!(cursor.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_into_stream() {
        let transport = Arc::new(ScriptedTransport::with_responses([
            page(0, 2, Some("p1")),
            page(2, 1, None),
        ]));
        let cursor = client(&transport)
            .find("ks/users", doc! {}, FindOptions::new())
            .unwrap();
        let documents: Vec<_> = cursor.into_stream().collect().await;
        assert_eq!(documents.len(), 3);
        assert!(documents.iter().all(Result::is_ok));
    }
}
