//! End-to-end tests for the session/token lifecycle core.
//!
//! Network operations run against wiremock servers; the login exchange is
//! driven through scripted transports so call counts and interleavings
//! are observable.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use vela_server_client::{
    ApiError, CredentialStore, LoginError, LoginTransport, MemoryCredentialStore, Server,
    ServerId, ServerKey, SessionManager, TokenGrant,
};

// =============================================================================
// Test doubles
// =============================================================================

#[derive(Clone, Copy)]
enum LoginOutcome {
    /// Succeed with token-N, where N is the call number
    Grant,
    /// 401/403 from the login endpoint: credentials proven wrong
    Reject,
    /// Connect failure / timeout: transient
    Offline,
}

/// Holds login calls open until the test releases them, so interleavings
/// around the single-flight slot are deterministic.
struct Gate {
    entered: AtomicUsize,
    release: Semaphore,
}

impl Gate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: AtomicUsize::new(0),
            release: Semaphore::new(0),
        })
    }

    async fn pass(&self) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let permit = self.release.acquire().await.expect("gate closed");
        permit.forget();
    }

    fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    fn open(&self, logins: usize) {
        self.release.add_permits(logins);
    }
}

/// Scripted login transport: consumes `outcomes` front to back, then
/// repeats `fallback`. Counts every exchange.
struct StubTransport {
    calls: AtomicUsize,
    outcomes: Mutex<VecDeque<LoginOutcome>>,
    fallback: LoginOutcome,
    gate: Option<Arc<Gate>>,
}

impl StubTransport {
    fn scripted(outcomes: Vec<LoginOutcome>, fallback: LoginOutcome) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            outcomes: Mutex::new(outcomes.into()),
            fallback,
            gate: None,
        })
    }

    fn always(fallback: LoginOutcome) -> Arc<Self> {
        Self::scripted(vec![], fallback)
    }

    fn gated(fallback: LoginOutcome, gate: Arc<Gate>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            outcomes: Mutex::new(VecDeque::new()),
            fallback,
            gate: Some(gate),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LoginTransport for StubTransport {
    async fn login(&self, _server: &Server, _password: &str) -> Result<TokenGrant, LoginError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        match outcome {
            LoginOutcome::Grant => Ok(TokenGrant {
                token: format!("token-{n}"),
                ttl: Some(Duration::from_secs(1800)),
                user_id: None,
            }),
            LoginOutcome::Reject => Err(LoginError::InvalidCredentials),
            LoginOutcome::Offline => Err(LoginError::Unreachable("connect timed out".into())),
        }
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    manager: Arc<SessionManager>,
    store: Arc<MemoryCredentialStore>,
    server: Server,
    key: ServerKey,
}

fn harness(transport: Arc<StubTransport>, base_url: &str) -> Harness {
    let store = Arc::new(MemoryCredentialStore::new());
    let manager = SessionManager::builder()
        .credentials(store.clone() as Arc<dyn CredentialStore>)
        .transport(transport as Arc<dyn LoginTransport>)
        .build()
        .expect("manager builds");

    let server = Server::new(ServerId::new("s1"), base_url, "alice").expect("valid server");
    let key = server.key();
    Harness {
        manager: Arc::new(manager),
        store,
        server,
        key,
    }
}

/// Poll until `cond` holds, failing the test after two seconds.
async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let start = tokio::time::Instant::now();
    while !cond() {
        assert!(
            start.elapsed() < Duration::from_secs(2),
            "timed out waiting for: {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// =============================================================================
// Single-flight re-authentication
// =============================================================================

mod single_flight {
    use super::*;

    #[tokio::test]
    async fn five_concurrent_reauths_make_one_login_call() {
        let gate = Gate::new();
        let transport = StubTransport::gated(LoginOutcome::Grant, gate.clone());
        let h = harness(transport.clone(), "https://media.example.com");

        h.manager
            .resume(h.server.clone(), "expired-token".into(), None)
            .unwrap();
        h.store.put(&h.key, "alice", "hunter2").await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let manager = Arc::clone(&h.manager);
            let key = h.key.clone();
            tasks.push(tokio::spawn(
                async move { manager.reauthenticate(&key).await },
            ));
        }

        // The winner is now inside the login exchange; give the losers
        // time to park on the watch channel before the outcome lands
        wait_until("winner to reach the login call", || gate.entered() == 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        gate.open(1);

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(transport.calls(), 1);

        let session = h.manager.session(&h.key).unwrap();
        assert_eq!(session.token.as_deref(), Some("token-1"));
        assert_eq!(session.token_version, 2);
    }

    #[tokio::test]
    async fn failed_single_flight_rejects_every_waiter_once() {
        let gate = Gate::new();
        let transport = StubTransport::gated(LoginOutcome::Reject, gate.clone());
        let h = harness(transport.clone(), "https://media.example.com");

        h.manager
            .resume(h.server.clone(), "expired-token".into(), None)
            .unwrap();
        h.store.put(&h.key, "alice", "wrong-password").await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..3 {
            let manager = Arc::clone(&h.manager);
            let key = h.key.clone();
            tasks.push(tokio::spawn(
                async move { manager.reauthenticate(&key).await },
            ));
        }

        wait_until("winner to reach the login call", || gate.entered() == 1).await;
        // Give the losers time to park on the watch channel before the
        // outcome lands
        tokio::time::sleep(Duration::from_millis(100)).await;
        gate.open(1);

        for task in tasks {
            match task.await.unwrap() {
                Err(ApiError::Unauthenticated) => {}
                other => panic!("Expected Unauthenticated, got: {:?}", other),
            }
        }
        assert_eq!(transport.calls(), 1);

        // The rejected password was discarded
        assert!(h.store.get(&h.key, "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn independent_servers_refresh_concurrently() {
        let gate = Gate::new();
        let transport = StubTransport::gated(LoginOutcome::Grant, gate.clone());

        let store = Arc::new(MemoryCredentialStore::new());
        let manager = Arc::new(
            SessionManager::builder()
                .credentials(store.clone() as Arc<dyn CredentialStore>)
                .transport(transport.clone() as Arc<dyn LoginTransport>)
                .build()
                .unwrap(),
        );

        let one = Server::new(ServerId::new("s1"), "https://one.example.com", "alice").unwrap();
        let two = Server::new(ServerId::new("s2"), "https://two.example.com", "alice").unwrap();
        for server in [&one, &two] {
            manager
                .resume(server.clone(), "expired-token".into(), None)
                .unwrap();
            store.put(&server.key(), "alice", "hunter2").await.unwrap();
        }

        let mut tasks = Vec::new();
        for server in [&one, &two] {
            let manager = Arc::clone(&manager);
            let key = server.key();
            tasks.push(tokio::spawn(
                async move { manager.reauthenticate(&key).await },
            ));
        }

        // Both logins are in flight at once: the single-flight slot is
        // per server, not global
        wait_until("both logins to be in flight", || gate.entered() == 2).await;
        gate.open(2);

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(transport.calls(), 2);
    }
}

// =============================================================================
// Cancellation isolation
// =============================================================================

mod cancellation {
    use super::*;

    #[tokio::test]
    async fn cancelled_winner_still_commits_and_persists() {
        let gate = Gate::new();
        let transport = StubTransport::gated(LoginOutcome::Grant, gate.clone());
        let h = harness(transport.clone(), "https://media.example.com");

        h.manager
            .resume(h.server.clone(), "expired-token".into(), None)
            .unwrap();
        h.store.put(&h.key, "alice", "hunter2").await.unwrap();

        let winner = {
            let manager = Arc::clone(&h.manager);
            let key = h.key.clone();
            tokio::spawn(async move { manager.reauthenticate(&key).await })
        };
        wait_until("winner to reach the login call", || gate.entered() == 1).await;

        let waiter = {
            let manager = Arc::clone(&h.manager);
            let key = h.key.clone();
            tokio::spawn(async move { manager.reauthenticate(&key).await })
        };
        // Let the waiter park on the in-flight attempt
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The caller that triggered the refresh goes away (UI navigation)
        winner.abort();
        assert!(winner.await.unwrap_err().is_cancelled());

        gate.open(1);

        // The exchange was not tied to the winner's lifetime: the waiter
        // observes a committed token and the credential write landed
        waiter.await.unwrap().unwrap();

        let session = h.manager.session(&h.key).unwrap();
        assert_eq!(session.token.as_deref(), Some("token-1"));
        assert!(!session.authenticating);

        let cred = h.store.get(&h.key, "alice").await.unwrap().unwrap();
        assert_eq!(cred.password, "hunter2");
        assert_eq!(transport.calls(), 1);
    }
}

// =============================================================================
// Request executor: retry/reauth protocol
// =============================================================================

mod executor {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn library_returns(mock_server: &MockServer, token: &str, status: u16) {
        let template = if status == 200 {
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tracks": [],
                "server_timestamp": 1704067200
            }))
        } else {
            ResponseTemplate::new(status)
        };
        let bearer = format!("Bearer {token}");
        Mock::given(method("GET"))
            .and(path("/api/library"))
            .and(header("Authorization", bearer.as_str()))
            .respond_with(template)
            .mount(mock_server)
            .await;
    }

    fn fetch_library(
        manager: &Arc<SessionManager>,
        key: &ServerKey,
        attempts: &Arc<AtomicUsize>,
    ) -> impl std::future::Future<Output = Result<serde_json::Value, ApiError>> {
        let manager = Arc::clone(manager);
        let key = key.clone();
        let attempts = Arc::clone(attempts);
        async move {
            manager
                .execute(&key, move |client| {
                    let attempts = Arc::clone(&attempts);
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        let request = client.get("/api/library");
                        client.json::<serde_json::Value>(request).await
                    }
                })
                .await
        }
    }

    #[tokio::test]
    async fn expired_token_five_concurrent_executes_one_login() {
        let mock_server = MockServer::start().await;
        library_returns(&mock_server, "token-1", 401).await;
        library_returns(&mock_server, "token-2", 200).await;

        let transport = StubTransport::always(LoginOutcome::Grant);
        let h = harness(transport.clone(), &mock_server.uri());

        // token-1 from the first login is already expired server-side
        h.manager.connect(h.server.clone(), "hunter2").await.unwrap();
        assert_eq!(transport.calls(), 1);

        let attempts = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..5 {
            tasks.push(tokio::spawn(fetch_library(&h.manager, &h.key, &attempts)));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // Exactly one re-login for the whole burst
        assert_eq!(transport.calls(), 2);
        assert_eq!(
            h.manager.session(&h.key).unwrap().token.as_deref(),
            Some("token-2")
        );
    }

    #[tokio::test]
    async fn valid_token_performs_zero_reauthentications() {
        let mock_server = MockServer::start().await;
        library_returns(&mock_server, "token-1", 200).await;

        let transport = StubTransport::always(LoginOutcome::Grant);
        let h = harness(transport.clone(), &mock_server.uri());
        h.manager.connect(h.server.clone(), "hunter2").await.unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        fetch_library(&h.manager, &h.key, &attempts).await.unwrap();
        fetch_library(&h.manager, &h.key, &attempts).await.unwrap();

        assert_eq!(transport.calls(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_is_bounded_to_exactly_one() {
        let mock_server = MockServer::start().await;
        // Every token is rejected: the server no longer accepts this user
        Mock::given(method("GET"))
            .and(path("/api/library"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let transport = StubTransport::always(LoginOutcome::Grant);
        let h = harness(transport.clone(), &mock_server.uri());
        h.manager.connect(h.server.clone(), "hunter2").await.unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        match fetch_library(&h.manager, &h.key, &attempts).await {
            Err(ApiError::Unauthenticated) => {}
            other => panic!("Expected Unauthenticated, got: {:?}", other),
        }

        // One original attempt, one reauth, one retry. No loop.
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn non_auth_errors_pass_through_unmodified() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/library"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&mock_server)
            .await;

        let transport = StubTransport::always(LoginOutcome::Grant);
        let h = harness(transport.clone(), &mock_server.uri());
        h.manager.connect(h.server.clone(), "hunter2").await.unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        match fetch_library(&h.manager, &h.key, &attempts).await {
            Err(ApiError::Server { status, message }) => {
                assert_eq!(status, 503);
                assert!(message.contains("maintenance"));
            }
            other => panic!("Expected Server error, got: {:?}", other),
        }

        // A 503 is the caller's problem, not a reauth trigger
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn login_timeout_keeps_credentials_and_later_retry_succeeds() {
        let mock_server = MockServer::start().await;
        library_returns(&mock_server, "token-1", 401).await;
        library_returns(&mock_server, "token-3", 200).await;

        // connect succeeds, the first reauth times out, the next succeeds
        let transport = StubTransport::scripted(
            vec![LoginOutcome::Grant, LoginOutcome::Offline],
            LoginOutcome::Grant,
        );
        let h = harness(transport.clone(), &mock_server.uri());
        h.manager.connect(h.server.clone(), "hunter2").await.unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        match fetch_library(&h.manager, &h.key, &attempts).await {
            Err(ApiError::Unauthenticated) => {}
            other => panic!("Expected Unauthenticated, got: {:?}", other),
        }

        // The timeout did not cost us the saved password
        let cred = h.store.get(&h.key, "alice").await.unwrap().unwrap();
        assert_eq!(cred.password, "hunter2");

        // Connectivity is back: the same stored password works
        let library = fetch_library(&h.manager, &h.key, &attempts).await.unwrap();
        assert!(library.get("tracks").is_some());
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn rejected_reauth_clears_credentials() {
        let mock_server = MockServer::start().await;
        library_returns(&mock_server, "token-1", 401).await;

        let transport =
            StubTransport::scripted(vec![LoginOutcome::Grant], LoginOutcome::Reject);
        let h = harness(transport.clone(), &mock_server.uri());
        h.manager.connect(h.server.clone(), "hunter2").await.unwrap();
        assert!(h.store.get(&h.key, "alice").await.unwrap().is_some());

        let attempts = Arc::new(AtomicUsize::new(0));
        match fetch_library(&h.manager, &h.key, &attempts).await {
            Err(ApiError::Unauthenticated) => {}
            other => panic!("Expected Unauthenticated, got: {:?}", other),
        }

        // The login endpoint proved the password wrong; it is gone
        assert!(h.store.get(&h.key, "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn execute_against_unknown_server_fails() {
        let transport = StubTransport::always(LoginOutcome::Grant);
        let h = harness(transport, "https://media.example.com");

        let attempts = Arc::new(AtomicUsize::new(0));
        match fetch_library(&h.manager, &h.key, &attempts).await {
            Err(ApiError::UnknownServer(_)) => {}
            other => panic!("Expected UnknownServer, got: {:?}", other),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }
}

// =============================================================================
// HTTP login transport
// =============================================================================

mod http_transport {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn http_harness(base_url: &str) -> Harness {
        let store = Arc::new(MemoryCredentialStore::new());
        let manager = SessionManager::builder()
            .credentials(store.clone() as Arc<dyn CredentialStore>)
            .build()
            .expect("manager builds");

        let server = Server::new(ServerId::new("s1"), base_url, "alice").expect("valid server");
        let key = server.key();
        Harness {
            manager: Arc::new(manager),
            store,
            server,
            key,
        }
    }

    #[tokio::test]
    async fn connect_performs_the_login_exchange() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .and(body_json(serde_json::json!({
                "username": "alice",
                "password": "hunter2"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "wire-token",
                "expires_in": 3600,
                "user_id": "u1"
            })))
            .mount(&mock_server)
            .await;

        let h = http_harness(&mock_server.uri());
        let session = h.manager.connect(h.server.clone(), "hunter2").await.unwrap();

        assert_eq!(session.token.as_deref(), Some("wire-token"));
        assert_eq!(session.ttl, Some(Duration::from_secs(3600)));
        assert_eq!(session.token_version, 1);

        let cred = h.store.get(&h.key, "alice").await.unwrap().unwrap();
        assert_eq!(cred.password, "hunter2");
    }

    #[tokio::test]
    async fn connect_with_wrong_password_is_unauthenticated() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": "unauthorized"
            })))
            .mount(&mock_server)
            .await;

        let h = http_harness(&mock_server.uri());
        match h.manager.connect(h.server.clone(), "wrong").await {
            Err(ApiError::Unauthenticated) => {}
            other => panic!("Expected Unauthenticated, got: {:?}", other.map(|_| ())),
        }
        // Nothing was stored for a rejected first login
        assert!(h.store.get(&h.key, "alice").await.unwrap().is_none());
        // The single-flight slot is free again
        assert!(!h.manager.session(&h.key).unwrap().authenticating);
    }

    #[tokio::test]
    async fn connect_to_unreachable_server_is_a_network_error() {
        let h = http_harness("http://127.0.0.1:9");
        match h.manager.connect(h.server.clone(), "hunter2").await {
            Err(ApiError::Network(_)) => {}
            other => panic!("Expected Network, got: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn login_server_error_is_transient() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let h = http_harness(&mock_server.uri());
        match h.manager.connect(h.server.clone(), "hunter2").await {
            Err(ApiError::Server { status: 500, .. }) => {}
            other => panic!("Expected Server error, got: {:?}", other.map(|_| ())),
        }
        assert!(!h.manager.session(&h.key).unwrap().authenticating);
    }
}

// =============================================================================
// Logout
// =============================================================================

mod logout {
    use super::*;

    #[tokio::test]
    async fn logout_destroys_session_but_keeps_credential() {
        let transport = StubTransport::always(LoginOutcome::Grant);
        let h = harness(transport, "https://media.example.com");

        h.manager.connect(h.server.clone(), "hunter2").await.unwrap();
        h.manager.logout(&h.key, false).await.unwrap();

        assert!(h.manager.session(&h.key).is_none());
        assert!(h.store.get(&h.key, "alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn logout_with_forget_discards_credential() {
        let transport = StubTransport::always(LoginOutcome::Grant);
        let h = harness(transport, "https://media.example.com");

        h.manager.connect(h.server.clone(), "hunter2").await.unwrap();
        h.manager.logout(&h.key, true).await.unwrap();

        assert!(h.manager.session(&h.key).is_none());
        assert!(h.store.get(&h.key, "alice").await.unwrap().is_none());
    }
}
