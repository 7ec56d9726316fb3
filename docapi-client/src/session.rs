//! HTTP/2 session management.
//!
//! A [`SessionManager`] keeps one [`Session`] (one multiplexed HTTP/2
//! connection) per origin. Every request is counted against the session's
//! budget; once `max_requests_per_session` requests have been dispatched the
//! session is moved into graceful close and a fresh one serves later
//! requests. A session in graceful close stays open until its last
//! in-flight request completes.
//!
//! Completion bookkeeping for a request runs exactly once, whichever of the
//! response and the timeout arrives first. A timed-out request keeps
//! running on its stream in the background.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::defaults::DEFAULT_MAX_REQUESTS_PER_SESSION;
use crate::error::TransportError;
use crate::request::CommandRequest;
use crate::response::RawResponse;
use crate::transport::CommandTransport;

/// Opens connections for new sessions.
pub trait SessionConnector: Send + Sync + 'static {
    fn connect<'a>(
        &'a self,
        origin: &'a str,
    ) -> BoxFuture<'a, Result<Arc<dyn SessionConnection>, TransportError>>;
}

/// A multiplexed connection owned by one session.
pub trait SessionConnection: Send + Sync + 'static {
    /// Start one exchange. The returned future does not borrow the
    /// connection, so it can outlive the caller's interest in it.
    fn send(&self, request: CommandRequest) -> BoxFuture<'static, Result<RawResponse, TransportError>>;

    /// Whether the underlying connection has gone away.
    fn is_closed(&self) -> bool;

    /// Tear the connection down.
    fn close(&self);
}

/// One HTTP/2 connection plus its request accounting.
pub struct Session {
    id: u64,
    origin: String,
    connection: Arc<dyn SessionConnection>,
    in_flight: AtomicUsize,
    total_requests: AtomicU64,
    completed: AtomicU64,
    closed: AtomicBool,
    graceful_close: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("in_flight", &self.in_flight())
            .field("total_requests", &self.total_requests())
            .field("closed", &self.is_closed())
            .field("graceful_close", &self.is_graceful_close_in_progress())
            .finish()
    }
}

impl Session {
    fn new(id: u64, origin: &str, connection: Arc<dyn SessionConnection>) -> Self {
        Self {
            id,
            origin: origin.to_string(),
            connection,
            in_flight: AtomicUsize::new(0),
            total_requests: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            graceful_close: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Requests dispatched on this session. Never decreases.
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::SeqCst)
    }

    /// Requests whose completion bookkeeping has run.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.connection.is_closed()
    }

    pub fn is_graceful_close_in_progress(&self) -> bool {
        self.graceful_close.load(Ordering::SeqCst)
    }

    fn begin_request(&self) -> u64 {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.total_requests.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn finish_request(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        let previous = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.is_graceful_close_in_progress() {
            self.close();
        }
    }

    /// Stop taking requests and close once nothing is in flight.
    fn begin_graceful_close(&self) {
        self.graceful_close.store(true, Ordering::SeqCst);
        if self.in_flight() == 0 {
            self.close();
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(origin = %self.origin, session = self.id, "closing session");
            self.connection.close();
        }
    }
}

/// Exactly-once completion for one request.
///
/// [`finish`](Completion::finish) may be called from the response path, the
/// timeout path and `Drop`; only the first call does any work.
pub struct Completion {
    session: Arc<Session>,
    done: AtomicBool,
}

impl Completion {
    fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            done: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Run completion bookkeeping. Returns whether this call performed it.
    pub fn finish(&self) -> bool {
        if self.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.session.finish_request();
        true
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Owns the HTTP/2 sessions of a client.
pub struct SessionManager {
    connector: Arc<dyn SessionConnector>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    max_requests_per_session: u64,
    next_session_id: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("max_requests_per_session", &self.max_requests_per_session)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(connector: Arc<dyn SessionConnector>) -> Self {
        Self {
            connector,
            sessions: Mutex::new(HashMap::new()),
            max_requests_per_session: DEFAULT_MAX_REQUESTS_PER_SESSION,
            next_session_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Rotate sessions after this many requests. Values below 1 are raised to 1.
    pub fn max_requests_per_session(mut self, max: u64) -> Self {
        self.max_requests_per_session = max.max(1);
        self
    }

    /// The current session for `origin`, connecting if there is none or the
    /// previous connection has closed.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] after [`close`](Self::close), or the
    /// connector's error.
    pub async fn acquire(&self, origin: &str) -> Result<Arc<Session>, TransportError> {
        let mut sessions = self.sessions.lock().await;
        self.current(&mut sessions, origin).await
    }

    async fn current(
        &self,
        sessions: &mut HashMap<String, Arc<Session>>,
        origin: &str,
    ) -> Result<Arc<Session>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if let Some(session) = sessions.get(origin) {
            if !session.is_closed() {
                return Ok(session.clone());
            }
            debug!(origin, session = session.id, "session closed, reconnecting");
            sessions.remove(origin);
        }

        let connection = self.connector.connect(origin).await?;
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session::new(id, origin, connection));
        debug!(origin, session = id, "session created");
        sessions.insert(origin.to_string(), session.clone());
        Ok(session)
    }

    /// Reserve a slot on the current session. The rotation check and the
    /// counter updates happen under the same lock.
    async fn checkout(&self, origin: &str) -> Result<Completion, TransportError> {
        let mut sessions = self.sessions.lock().await;
        let session = self.current(&mut sessions, origin).await?;
        let total = session.begin_request();
        if total >= self.max_requests_per_session {
            debug!(origin, session = session.id, total, "session request budget reached, rotating");
            sessions.remove(origin);
            session.begin_graceful_close();
        }
        Ok(Completion::new(session))
    }

    /// Send one request on the current session for its origin.
    ///
    /// The request's timeout covers opening a session as well as the
    /// exchange, which runs on a spawned task.
    pub async fn request(&self, request: CommandRequest) -> Result<RawResponse, TransportError> {
        let origin = request.origin()?;
        let timeout = request.timeout;
        let body = request.body.clone();
        let deadline = Instant::now() + timeout;
        let timed_out = || TransportError::timeout(timeout, String::from_utf8_lossy(&body).into_owned());

        let completion = match tokio::time::timeout_at(deadline, self.checkout(&origin)).await {
            Ok(checkout) => Arc::new(checkout?),
            Err(_) => {
                debug!(origin, "timed out waiting for a session");
                return Err(timed_out());
            }
        };
        let exchange = completion.session().connection.send(request);
        let task_completion = completion.clone();
        let task = tokio::spawn(async move {
            let result = exchange.await;
            task_completion.finish();
            result
        });

        match tokio::time::timeout_at(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                completion.finish();
                Err(TransportError::Request(format!("request task failed: {e}")))
            }
            Err(_) => {
                completion.finish();
                Err(timed_out())
            }
        }
    }

    /// Gracefully close every session. Later requests fail with
    /// [`TransportError::Closed`]. Calling this twice is harmless.
    pub async fn close(&self) {
        let mut sessions = self.sessions.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        for (_, session) in sessions.drain() {
            session.begin_graceful_close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl CommandTransport for SessionManager {
    fn send(&self, request: CommandRequest) -> BoxFuture<'_, Result<RawResponse, TransportError>> {
        Box::pin(self.request(request))
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(SessionManager::close(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};
    use serde_json::json;
    use std::sync::Barrier;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    const ORIGIN: &str = "http://db.test:8181";

    struct FakeConnection {
        gate: Option<Arc<Semaphore>>,
        fail: bool,
        closed: AtomicBool,
        close_calls: AtomicUsize,
        sent: Arc<AtomicUsize>,
        responded: Arc<AtomicUsize>,
    }

    impl SessionConnection for FakeConnection {
        fn send(&self, _request: CommandRequest) -> BoxFuture<'static, Result<RawResponse, TransportError>> {
            let gate = self.gate.clone();
            let fail = self.fail;
            let responded = self.responded.clone();
            self.sent.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if let Some(gate) = gate {
                    gate.acquire().await.map_err(|_| TransportError::Closed)?.forget();
                }
                responded.fetch_add(1, Ordering::SeqCst);
                if fail {
                    return Err(TransportError::Request("connection reset".to_string()));
                }
                Ok(RawResponse::new(StatusCode::OK, json!({ "status": { "ok": 1 } })))
            })
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn close(&self) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        gate: Option<Arc<Semaphore>>,
        fail: bool,
        connections: parking_lot::Mutex<Vec<Arc<FakeConnection>>>,
        sent: Arc<AtomicUsize>,
        responded: Arc<AtomicUsize>,
    }

    impl FakeConnector {
        fn gated(gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn connects(&self) -> usize {
            self.connections.lock().len()
        }

        fn connection(&self, index: usize) -> Arc<FakeConnection> {
            self.connections.lock()[index].clone()
        }
    }

    impl SessionConnector for FakeConnector {
        fn connect<'a>(
            &'a self,
            _origin: &'a str,
        ) -> BoxFuture<'a, Result<Arc<dyn SessionConnection>, TransportError>> {
            Box::pin(async move {
                let connection = Arc::new(FakeConnection {
                    gate: self.gate.clone(),
                    fail: self.fail,
                    closed: AtomicBool::new(false),
                    close_calls: AtomicUsize::new(0),
                    sent: self.sent.clone(),
                    responded: self.responded.clone(),
                });
                self.connections.lock().push(connection.clone());
                Ok(connection as Arc<dyn SessionConnection>)
            })
        }
    }

    /// Never finishes connecting.
    struct StalledConnector;

    impl SessionConnector for StalledConnector {
        fn connect<'a>(
            &'a self,
            _origin: &'a str,
        ) -> BoxFuture<'a, Result<Arc<dyn SessionConnection>, TransportError>> {
            Box::pin(futures::future::pending())
        }
    }

    fn request(timeout: Duration) -> CommandRequest {
        CommandRequest::new(
            format!("{ORIGIN}/v1/ks/users").parse().unwrap(),
            HeaderMap::new(),
            Bytes::from_static(br#"{"findOne":{}}"#),
            timeout,
        )
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..10_000 {
            if condition() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_response_before_timeout_completes_once() {
        let connector = Arc::new(FakeConnector::default());
        let manager = SessionManager::new(connector.clone());

        let response = manager.request(request(Duration::from_secs(5))).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);

        let session = manager.acquire(ORIGIN).await.unwrap();
        assert_eq!(session.in_flight(), 0);
        assert_eq!(session.completed(), 1);
        assert_eq!(session.total_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_before_response_completes_once() {
        let gate = Arc::new(Semaphore::new(0));
        let connector = Arc::new(FakeConnector::gated(gate.clone()));
        let manager = SessionManager::new(connector.clone());

        let err = manager
            .request(request(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransportError::Timeout {
                timeout_ms: 50,
                body: r#"{"findOne":{}}"#.to_string(),
            }
        );

        let session = manager.acquire(ORIGIN).await.unwrap();
        assert_eq!(session.in_flight(), 0);
        assert_eq!(session.completed(), 1);

        // The abandoned exchange finishes later; its completion is a no-op.
        gate.add_permits(1);
        wait_until(|| connector.responded.load(Ordering::SeqCst) == 1).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(session.in_flight(), 0);
        assert_eq!(session.completed(), 1);
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_transport_error_completes_once() {
        let connector = Arc::new(FakeConnector::failing());
        let manager = SessionManager::new(connector.clone());

        let err = manager
            .request(request(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Request("connection reset".to_string()));

        let session = manager.acquire(ORIGIN).await.unwrap();
        assert_eq!(session.in_flight(), 0);
        assert_eq!(session.completed(), 1);
        assert_eq!(session.total_requests(), 1);
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_rotated_session_closes_after_failed_last_request() {
        let connector = Arc::new(FakeConnector::failing());
        let manager = SessionManager::new(connector.clone()).max_requests_per_session(1);
        let old = manager.acquire(ORIGIN).await.unwrap();

        manager
            .request(request(Duration::from_secs(5)))
            .await
            .unwrap_err();

        assert!(old.is_graceful_close_in_progress());
        assert_eq!(old.in_flight(), 0);
        assert_eq!(old.completed(), 1);
        assert!(old.is_closed());
        assert_eq!(connector.connection(0).close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_covers_session_connect() {
        let manager = SessionManager::new(Arc::new(StalledConnector));

        let err = tokio::time::timeout(
            Duration::from_secs(3600),
            manager.request(request(Duration::from_millis(50))),
        )
        .await
        .expect("request should time out on its own deadline")
        .unwrap_err();
        assert_eq!(
            err,
            TransportError::Timeout {
                timeout_ms: 50,
                body: r#"{"findOne":{}}"#.to_string(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_connect_does_not_outlive_other_deadlines() {
        let manager = Arc::new(SessionManager::new(Arc::new(StalledConnector)));

        let slow = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.request(request(Duration::from_secs(10))).await })
        };
        tokio::task::yield_now().await;

        // Queued behind the stalled connect, but still bounded by its own timeout.
        let started = Instant::now();
        let err = manager
            .request(request(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(1));

        assert!(slow.await.unwrap().unwrap_err().is_timeout());
        // The lock is free again once the stalled connect is abandoned.
        manager.close().await;
        assert!(manager.is_closed());
    }

    #[tokio::test]
    async fn test_simultaneous_finish_runs_once() {
        let connector = Arc::new(FakeConnector::default());
        let manager = SessionManager::new(connector.clone());
        let completion = Arc::new(manager.checkout(ORIGIN).await.unwrap());
        let session = completion.session().clone();
        assert_eq!(session.in_flight(), 1);

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let completion = completion.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    completion.finish()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        drop(completion);
        assert_eq!(session.in_flight(), 0);
        assert_eq!(session.completed(), 1);
    }

    #[tokio::test]
    async fn test_rotation_after_exactly_max_requests() {
        let connector = Arc::new(FakeConnector::default());
        let manager = SessionManager::new(connector.clone()).max_requests_per_session(3);

        let first = manager.acquire(ORIGIN).await.unwrap();
        for _ in 0..3 {
            manager.request(request(Duration::from_secs(5))).await.unwrap();
        }
        assert_eq!(connector.connects(), 1);
        assert_eq!(first.total_requests(), 3);
        assert!(first.is_graceful_close_in_progress());
        assert!(first.is_closed());
        assert_eq!(connector.connection(0).close_calls.load(Ordering::SeqCst), 1);

        manager.request(request(Duration::from_secs(5))).await.unwrap();
        assert_eq!(connector.connects(), 2);
        let second = manager.acquire(ORIGIN).await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(second.total_requests(), 1);
    }

    #[tokio::test]
    async fn test_rotated_session_drains_before_closing() {
        let gate = Arc::new(Semaphore::new(0));
        let connector = Arc::new(FakeConnector::gated(gate.clone()));
        let manager = Arc::new(SessionManager::new(connector.clone()).max_requests_per_session(2));
        let old = manager.acquire(ORIGIN).await.unwrap();

        let pending: Vec<_> = (0..2)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.request(request(Duration::from_secs(30))).await })
            })
            .collect();
        wait_until(|| connector.sent.load(Ordering::SeqCst) == 2).await;

        assert!(old.is_graceful_close_in_progress());
        assert!(!old.is_closed());
        assert_eq!(old.in_flight(), 2);

        // New requests go to a fresh session while the old one drains.
        let fresh = manager.acquire(ORIGIN).await.unwrap();
        assert_ne!(fresh.id(), old.id());
        assert_eq!(connector.connects(), 2);

        gate.add_permits(1);
        wait_until(|| old.in_flight() == 1).await;
        assert!(!old.is_closed());

        gate.add_permits(1);
        for handle in pending {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(old.in_flight(), 0);
        assert_eq!(old.completed(), 2);
        assert!(old.is_closed());
        assert_eq!(connector.connection(0).close_calls.load(Ordering::SeqCst), 1);
        assert!(!fresh.is_closed());
    }

    #[tokio::test]
    async fn test_closed_connection_is_recreated() {
        let connector = Arc::new(FakeConnector::default());
        let manager = SessionManager::new(connector.clone());

        let first = manager.acquire(ORIGIN).await.unwrap();
        connector.connection(0).closed.store(true, Ordering::SeqCst);
        let second = manager.acquire(ORIGIN).await.unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_acquire_fails_after_close() {
        let connector = Arc::new(FakeConnector::default());
        let manager = SessionManager::new(connector.clone());
        let session = manager.acquire(ORIGIN).await.unwrap();

        manager.close().await;
        manager.close().await;

        assert!(session.is_closed());
        assert_eq!(connector.connection(0).close_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.acquire(ORIGIN).await.unwrap_err(), TransportError::Closed);
        assert_eq!(
            manager.request(request(Duration::from_secs(1))).await.unwrap_err(),
            TransportError::Closed
        );
    }

    #[tokio::test]
    async fn test_graceful_close_with_nothing_in_flight_closes_now() {
        let connector = Arc::new(FakeConnector::default());
        let manager = SessionManager::new(connector.clone());
        let session = manager.acquire(ORIGIN).await.unwrap();

        session.begin_graceful_close();
        assert!(session.is_closed());
    }
}
