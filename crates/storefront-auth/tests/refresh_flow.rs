//! End-to-end refresh behaviour against a scripted in-process backend.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::Secret;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use serde_json::json;
use storefront_auth::{
    ApiRequest, ApiResponse, AuthConfig, Client, CredentialStore, Error, Navigator, RefreshError,
    RouteChannel, Session, Transport,
};
use tokio::sync::watch;

/// What the refresh endpoint answers.
#[derive(Clone)]
enum RefreshReply {
    Issue(&'static str),
    Reject(StatusCode),
    Body(serde_json::Value),
}

/// Storefront backend double.
///
/// Protected endpoints accept only `valid_token`. The refresh endpoint holds
/// its answer until `gate` protected requests have arrived, so concurrent
/// callers are guaranteed to overlap the in-flight refresh.
struct Backend {
    valid_token: Mutex<String>,
    reject_status: StatusCode,
    always_reject: bool,
    refresh_reply: RefreshReply,
    gate: usize,
    refresh_calls: AtomicUsize,
    refreshes_answered: AtomicUsize,
    protected_calls: AtomicUsize,
    seen: Mutex<Vec<(String, Option<String>)>>,
}

impl Backend {
    fn new(valid_token: &str, refresh_reply: RefreshReply) -> Self {
        Self {
            valid_token: Mutex::new(valid_token.into()),
            reject_status: StatusCode::UNAUTHORIZED,
            always_reject: false,
            refresh_reply,
            gate: 0,
            refresh_calls: AtomicUsize::new(0),
            refreshes_answered: AtomicUsize::new(0),
            protected_calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn authorizations_for(&self, path: &str) -> Vec<Option<String>> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, auth)| auth.clone())
            .collect()
    }

    async fn handle(&self, request: &ApiRequest) -> storefront_auth::Result<ApiResponse> {
        let auth = request
            .headers
            .get(AUTHORIZATION)
            .map(|v| v.to_str().unwrap().to_string());
        self.seen
            .lock()
            .unwrap()
            .push((request.path.clone(), auth.clone()));

        match request.path.as_str() {
            "/offline" => Err(Error::Http("connection refused".into())),
            "/auth/login" => {
                let body = match &request.body {
                    storefront_auth::RequestBody::Json(body) => body.clone(),
                    _ => json!({}),
                };
                if body["password"] == "correct" {
                    *self.valid_token.lock().unwrap() = "at_login".into();
                    Ok(ApiResponse::json_body(
                        StatusCode::OK,
                        &json!({
                            "message": "Login successful",
                            "user": {"id": 5, "username": "ana", "email": "ana@shop.test",
                                     "role": "customer", "is_active": true},
                            "access_token": "at_login",
                            "refresh_token": "rt_login"
                        }),
                    ))
                } else {
                    Ok(ApiResponse::json_body(
                        StatusCode::UNAUTHORIZED,
                        &json!({"error": "Invalid email or password"}),
                    ))
                }
            }
            "/auth/refresh" => {
                self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                while self.protected_calls.load(Ordering::SeqCst) < self.gate {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.refreshes_answered.fetch_add(1, Ordering::SeqCst);
                Ok(match &self.refresh_reply {
                    RefreshReply::Issue(token) => {
                        *self.valid_token.lock().unwrap() = token.to_string();
                        ApiResponse::json_body(StatusCode::OK, &json!({"access_token": token}))
                    }
                    RefreshReply::Reject(status) => ApiResponse::json_body(
                        *status,
                        &json!({"msg": "Signature verification failed"}),
                    ),
                    RefreshReply::Body(body) => ApiResponse::json_body(StatusCode::OK, body),
                })
            }
            "/products/missing" => Ok(ApiResponse::json_body(
                StatusCode::NOT_FOUND,
                &json!({"error": "Product not found"}),
            )),
            "/broken" => Ok(ApiResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "boom")),
            path => {
                self.protected_calls.fetch_add(1, Ordering::SeqCst);
                let expected = format!("Bearer {}", self.valid_token.lock().unwrap());
                if !self.always_reject && auth.as_deref() == Some(expected.as_str()) {
                    Ok(ApiResponse::json_body(StatusCode::OK, &json!({"path": path})))
                } else {
                    Ok(ApiResponse::json_body(
                        self.reject_status,
                        &json!({"msg": "Token has expired"}),
                    ))
                }
            }
        }
    }
}

impl Transport for Backend {
    fn send<'a>(
        &'a self,
        request: &'a ApiRequest,
    ) -> Pin<Box<dyn Future<Output = storefront_auth::Result<ApiResponse>> + Send + 'a>> {
        Box::pin(self.handle(request))
    }
}

struct Harness {
    backend: Arc<Backend>,
    client: Client,
    store: CredentialStore,
    routes: watch::Receiver<String>,
}

fn seeded_store() -> CredentialStore {
    let store = CredentialStore::in_memory();
    store
        .store_session(
            &Secret::new("at_old".into()),
            Some(&Secret::new("rt_1".into())),
            Some(&json!({"id": 5, "username": "ana", "email": "ana@shop.test",
                         "role": "customer", "is_active": true})),
        )
        .unwrap();
    store
}

fn harness(backend: Backend) -> Harness {
    let backend = Arc::new(backend);
    let store = seeded_store();
    let (navigator, routes) = RouteChannel::new("/orders");
    let client = Client::new(
        backend.clone(),
        store.clone(),
        Arc::new(navigator),
        &AuthConfig::default(),
    );
    Harness {
        backend,
        client,
        store,
        routes,
    }
}

async fn fire_concurrently(client: &Client, n: usize) -> Vec<storefront_auth::Result<ApiResponse>> {
    let handles: Vec<_> = (0..n)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move { client.execute(ApiRequest::get(format!("/orders/{i}"))).await })
        })
        .collect();
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

#[tokio::test]
async fn five_concurrent_rejections_share_one_refresh() {
    let mut backend = Backend::new("new-token", RefreshReply::Issue("new-token"));
    backend.gate = 5;
    let h = harness(backend);

    let results = fire_concurrently(&h.client, 5).await;

    for result in &results {
        assert_eq!(result.as_ref().unwrap().status, StatusCode::OK);
    }
    assert_eq!(h.backend.refresh_calls(), 1);
    for i in 0..5 {
        let auths = h.backend.authorizations_for(&format!("/orders/{i}"));
        assert_eq!(
            auths,
            vec![
                Some("Bearer at_old".to_string()),
                Some("Bearer new-token".to_string())
            ],
            "request {i} must be retried once with the refreshed token"
        );
    }
    assert_eq!(h.store.access_token().unwrap().expose(), "new-token");
    assert!(!h.client.coordinator().is_refreshing());
}

#[tokio::test]
async fn unprocessable_rejection_is_treated_like_unauthorized() {
    let mut backend = Backend::new("new-token", RefreshReply::Issue("new-token"));
    backend.reject_status = StatusCode::UNPROCESSABLE_ENTITY;
    let h = harness(backend);

    let response = h.client.execute(ApiRequest::get("/orders")).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(h.backend.refresh_calls(), 1);
}

#[tokio::test]
async fn valid_credential_never_refreshes() {
    let h = harness(Backend::new("at_old", RefreshReply::Issue("unused")));

    let response = h.client.execute(ApiRequest::get("/orders")).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(h.backend.refresh_calls(), 0);
    assert_eq!(
        h.backend.authorizations_for("/orders"),
        vec![Some("Bearer at_old".to_string())]
    );
}

#[tokio::test]
async fn refresh_rejection_tears_down_once_and_rejects_everyone() {
    let mut backend = Backend::new("unused", RefreshReply::Reject(StatusCode::UNPROCESSABLE_ENTITY));
    backend.gate = 5;
    let mut h = harness(backend);

    let results = fire_concurrently(&h.client, 5).await;

    for result in results {
        match result {
            Err(Error::Refresh(RefreshError::Rejected { status, .. })) => {
                assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY)
            }
            other => panic!("expected refresh rejection, got {other:?}"),
        }
    }
    assert_eq!(h.backend.refresh_calls(), 1);
    assert!(h.store.access_token().is_none());
    assert!(h.store.refresh_token().is_none());
    assert!(h.store.user().is_none());
    assert!(h.routes.has_changed().unwrap());
    assert_eq!(*h.routes.borrow_and_update(), "/");

    // Later requests fail without another refresh until a new login.
    let err = h.client.execute(ApiRequest::get("/cart")).await.unwrap_err();
    assert!(matches!(err, Error::Refresh(RefreshError::SessionEnded)), "got {err:?}");
    assert_eq!(h.backend.refresh_calls(), 1);
    assert_eq!(h.backend.authorizations_for("/cart"), vec![None]);
}

#[tokio::test]
async fn second_rejection_is_not_retried_again() {
    let mut backend = Backend::new("new-token", RefreshReply::Issue("new-token"));
    backend.always_reject = true;
    let h = harness(backend);

    let err = h.client.execute(ApiRequest::get("/orders")).await.unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    assert_eq!(h.backend.refresh_calls(), 1);
    assert_eq!(h.backend.authorizations_for("/orders").len(), 2);
    // The refresh itself succeeded, so the session survives.
    assert_eq!(h.store.access_token().unwrap().expose(), "new-token");
    assert!(!h.client.coordinator().session_ended());
}

#[tokio::test]
async fn malformed_refresh_response_is_terminal() {
    let backend = Backend::new("unused", RefreshReply::Body(json!({"message": "ok"})));
    let h = harness(backend);

    let err = h.client.execute(ApiRequest::get("/orders")).await.unwrap_err();

    assert!(
        matches!(err, Error::Refresh(RefreshError::Malformed(_))),
        "got {err:?}"
    );
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn unrelated_errors_pass_through_untouched() {
    let h = harness(Backend::new("at_old", RefreshReply::Issue("unused")));

    match h.client.execute(ApiRequest::get("/products/missing")).await {
        Err(Error::Status { status, body }) => {
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert!(body.contains("Product not found"));
        }
        other => panic!("expected 404, got {other:?}"),
    }
    match h.client.execute(ApiRequest::get("/broken")).await {
        Err(Error::Status { status, body }) => {
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(body, "boom");
        }
        other => panic!("expected 500, got {other:?}"),
    }
    let err = h.client.execute(ApiRequest::get("/offline")).await.unwrap_err();
    assert!(matches!(err, Error::Http(_)));

    assert_eq!(h.backend.refresh_calls(), 0);
    assert_eq!(h.store.access_token().unwrap().expose(), "at_old");
}

#[tokio::test]
async fn failed_login_never_triggers_refresh() {
    let h = harness(Backend::new("at_old", RefreshReply::Issue("unused")));
    let session = Session::new(h.client.clone());

    let err = session.login("ana@shop.test", "wrong").await.unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    assert_eq!(h.backend.refresh_calls(), 0);
    assert_eq!(h.backend.authorizations_for("/auth/login"), vec![None]);
    assert!(!h.client.coordinator().session_ended());
}

#[tokio::test]
async fn explicit_refresh_with_invalid_refresh_token_ends_session() {
    let h = harness(Backend::new(
        "unused",
        RefreshReply::Reject(StatusCode::UNPROCESSABLE_ENTITY),
    ));
    let session = Session::new(h.client.clone());

    let err = session.refresh().await.unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::UNPROCESSABLE_ENTITY));
    assert_eq!(h.backend.refresh_calls(), 1, "no recursive refresh");
    assert_eq!(
        h.backend.authorizations_for("/auth/refresh"),
        vec![Some("Bearer rt_1".to_string())]
    );
    assert!(h.store.is_empty());
    assert!(h.client.coordinator().session_ended());
}

#[tokio::test]
async fn login_after_teardown_resumes_refreshing() {
    let h = harness(Backend::new("at_old", RefreshReply::Issue("unused")));
    let session = Session::new(h.client.clone());

    session.logout();
    assert!(h.store.is_empty());
    assert!(!session.is_authenticated());

    let auth = session.login("ana@shop.test", "correct").await.unwrap();
    assert_eq!(auth.user.email, "ana@shop.test");
    assert_eq!(h.store.access_token().unwrap().expose(), "at_login");
    assert_eq!(h.store.refresh_token().unwrap().expose(), "rt_login");
    assert!(!h.client.coordinator().session_ended());
    assert_eq!(session.restore().unwrap().id, 5);

    let response = h.client.execute(ApiRequest::get("/orders")).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn restore_discards_corrupt_profile() {
    let h = harness(Backend::new("at_old", RefreshReply::Issue("unused")));
    h.store.set_user(&json!("not a user object")).unwrap();
    let session = Session::new(h.client.clone());

    assert!(session.restore().is_none());
    assert!(h.store.access_token().is_none());
    assert!(h.store.user().is_none());
    // The refresh credential is left for the next sign-in flow.
    assert!(h.store.refresh_token().is_some());
}

/// Navigator that never leaves its route, so every teardown run navigates.
struct CountingNavigator {
    navigations: AtomicUsize,
}

impl Navigator for CountingNavigator {
    fn current_route(&self) -> String {
        "/orders".into()
    }

    fn navigate(&self, _route: &str) {
        self.navigations.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn concurrent_failures_tear_down_exactly_once() {
    let mut backend = Backend::new("unused", RefreshReply::Reject(StatusCode::UNAUTHORIZED));
    backend.gate = 5;
    let backend = Arc::new(backend);
    let navigator = Arc::new(CountingNavigator {
        navigations: AtomicUsize::new(0),
    });
    let client = Client::new(
        backend.clone(),
        seeded_store(),
        navigator.clone(),
        &AuthConfig::default(),
    );

    let results = fire_concurrently(&client, 5).await;

    assert!(results.iter().all(|r| r.is_err()));
    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(navigator.navigations.load(Ordering::SeqCst), 1);
}

async fn wait_until_refreshing(client: &Client) {
    while !client.coordinator().is_refreshing() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test]
async fn refresh_from_previous_session_is_discarded_after_new_login() {
    let mut backend = Backend::new("at_previous", RefreshReply::Issue("at_previous"));
    // The refresh answers only after the new session makes its first request.
    backend.gate = 2;
    let h = harness(backend);
    let session = Session::new(h.client.clone());

    let client = h.client.clone();
    let pending = tokio::spawn(async move { client.execute(ApiRequest::get("/orders")).await });
    wait_until_refreshing(&h.client).await;

    session.logout();
    session.login("ana@shop.test", "correct").await.unwrap();
    let response = h.client.execute(ApiRequest::get("/profile")).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Refresh(RefreshError::SessionEnded)), "got {err:?}");

    while h.backend.refreshes_answered.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(h.store.access_token().unwrap().expose(), "at_login");
    assert_eq!(h.store.refresh_token().unwrap().expose(), "rt_login");
    assert!(h.store.user().unwrap().contains("ana@shop.test"));
    assert!(!h.client.coordinator().session_ended());
}

#[tokio::test]
async fn explicit_refresh_joins_refresh_in_flight() {
    let mut backend = Backend::new("new-token", RefreshReply::Issue("new-token"));
    backend.gate = 2;
    let h = harness(backend);
    let session = Session::new(h.client.clone());

    let client = h.client.clone();
    let first = tokio::spawn(async move { client.execute(ApiRequest::get("/orders")).await });
    wait_until_refreshing(&h.client).await;

    let explicit = tokio::spawn(async move { session.refresh().await });
    tokio::time::sleep(Duration::from_millis(5)).await;

    // Second protected request releases the held refresh.
    let second = h.client.execute(ApiRequest::get("/cart")).await.unwrap();

    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(first.await.unwrap().unwrap().status, StatusCode::OK);
    assert_eq!(explicit.await.unwrap().unwrap().expose(), "new-token");
    assert_eq!(h.backend.refresh_calls(), 1);
}

#[tokio::test]
async fn explicit_refresh_sends_stored_refresh_token() {
    let h = harness(Backend::new("at_fresh", RefreshReply::Issue("at_fresh")));
    let session = Session::new(h.client.clone());

    let token = session.refresh().await.unwrap();

    assert_eq!(token.expose(), "at_fresh");
    assert_eq!(
        h.backend.authorizations_for("/auth/refresh"),
        vec![Some("Bearer rt_1".to_string())]
    );
    assert_eq!(h.store.access_token().unwrap().expose(), "at_fresh");
}
