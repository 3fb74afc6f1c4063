//! Single-flight access credential refresh
//!
//! When many requests discover an expired access credential at once, exactly
//! one refresh round-trip runs; every other caller queues behind it and
//! receives the same outcome. State is `Idle` or `Refreshing { waiters }`
//! behind a Mutex, and the `Idle → Refreshing` transition happens under that
//! lock before anything is awaited, so no caller can observe a stale `Idle`.
//!
//! The round-trip runs in its own spawned task, bounded by the configured
//! timeout. Dropping a caller's future therefore never strands the queue: the
//! waiters are always drained exactly once, in full, when the task settles.
//!
//! Every session boundary (sign-out, teardown, sign-in) bumps a generation
//! counter. A cycle settles only into the generation it started in; a result
//! that arrives after the boundary is discarded and never touches the store.
//!
//! Outcomes:
//! - Success: the new access credential (plus a rotated refresh credential and
//!   user profile, when the response carries them) is written to the store
//!   under the lock, then every waiter is resolved with the credential.
//! - Failure (network error, non-success status, malformed body, timeout):
//!   the session is torn down once and every waiter is rejected with the same
//!   error. Further refreshes are refused with `SessionEnded` until a new
//!   session begins.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use common::Secret;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::{AuthConfig, RefreshCredentialMode};
use crate::error::{RefreshError, Result};
use crate::request::{ApiRequest, bearer_header};
use crate::store::CredentialStore;
use crate::teardown::SessionTeardown;
use crate::transport::Transport;

type RefreshResult = std::result::Result<Secret<String>, RefreshError>;

type Waiter = oneshot::Sender<RefreshResult>;

enum RefreshState {
    Idle,
    Refreshing { generation: u64, waiters: Vec<Waiter> },
}

struct Shared {
    state: RefreshState,
    /// Set by teardown, cleared by a new sign-in
    session_ended: bool,
    generation: u64,
}

impl Shared {
    /// Cross a session boundary, detaching any cycle in flight.
    fn next_generation(&mut self) -> Vec<Waiter> {
        self.generation += 1;
        take_waiters(self)
    }
}

/// What asked for the refresh.
#[derive(Clone, Copy)]
enum Trigger<'a> {
    /// A request was rejected while carrying this access credential.
    Rejected(Option<&'a str>),
    /// A new credential was requested outright.
    Explicit,
}

/// Body of a successful refresh response.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default, alias = "access")]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    user: Option<serde_json::Value>,
}

/// Validated refresh response, not yet persisted.
struct Refreshed {
    access: Secret<String>,
    refresh: Option<Secret<String>>,
    user: Option<serde_json::Value>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    store: CredentialStore,
    teardown: SessionTeardown,
    refresh_path: String,
    timeout: Duration,
    credential_mode: RefreshCredentialMode,
    shared: Mutex<Shared>,
}

/// Coordinates refreshes of the access credential.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: CredentialStore,
        teardown: SessionTeardown,
        config: &AuthConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                teardown,
                refresh_path: config.refresh_path.clone(),
                timeout: config.refresh_timeout(),
                credential_mode: config.refresh_credential,
                shared: Mutex::new(Shared {
                    state: RefreshState::Idle,
                    session_ended: false,
                    generation: 0,
                }),
            }),
        }
    }

    /// Obtain a fresh access credential after a request was rejected.
    ///
    /// `stale` is the credential the failing request was sent with. If the
    /// store already holds a different one, a refresh completed since that
    /// request went out and the stored credential is returned without another
    /// round-trip.
    pub async fn request_refresh(&self, stale: Option<&str>) -> RefreshResult {
        self.join(Trigger::Rejected(stale)).await
    }

    /// Refresh now, whatever the store holds.
    ///
    /// Joins a cycle already in flight instead of starting a second one.
    pub async fn refresh_now(&self) -> RefreshResult {
        self.join(Trigger::Explicit).await
    }

    async fn join(&self, trigger: Trigger<'_>) -> RefreshResult {
        let rx = {
            let mut shared = self.inner.lock();
            if shared.session_ended {
                debug!("session ended, refusing refresh");
                return Err(RefreshError::SessionEnded);
            }

            let (tx, rx) = oneshot::channel();
            if let RefreshState::Refreshing { waiters, .. } = &mut shared.state {
                waiters.push(tx);
                crate::metrics::record_refresh_waiter();
                debug!(queued = waiters.len(), "refresh in flight, waiting for it");
            } else {
                if let Trigger::Rejected(stale) = trigger
                    && let Some(current) = self.inner.store.access_token()
                    && stale != Some(current.expose().as_str())
                {
                    crate::metrics::record_refresh("reused");
                    debug!("credential already refreshed, reusing stored token");
                    return Ok(current);
                }

                let generation = shared.generation;
                shared.state = RefreshState::Refreshing {
                    generation,
                    waiters: vec![tx],
                };
                let inner = self.inner.clone();
                tokio::spawn(async move { inner.run_refresh(generation).await });
            }
            rx
        };

        rx.await.unwrap_or(Err(RefreshError::Aborted))
    }

    /// Tear the session down and refuse refreshes until a new session begins.
    ///
    /// Used when the refresh credential is known to be invalid outside a
    /// refresh cycle, and for explicit sign-out. A cycle in flight is
    /// detached; its waiters get `SessionEnded`.
    pub fn end_session(&self) {
        let waiters = {
            let mut shared = self.inner.lock();
            shared.session_ended = true;
            shared.next_generation()
        };
        self.inner.teardown.run();
        deliver(waiters, Err(RefreshError::SessionEnded));
    }

    /// Persist a freshly signed-in session and allow refreshes again.
    ///
    /// The write happens under the coordinator lock, so a cycle from the
    /// previous session can never land on top of it.
    pub fn begin_session(
        &self,
        access: &Secret<String>,
        refresh: Option<&Secret<String>>,
        user: Option<&serde_json::Value>,
    ) -> Result<()> {
        let waiters = {
            let mut shared = self.inner.lock();
            self.inner.store.store_session(access, refresh, user)?;
            shared.session_ended = false;
            shared.next_generation()
        };
        debug!("session started");
        deliver(waiters, Err(RefreshError::SessionEnded));
        Ok(())
    }

    /// Allow refreshes again after the host restored a session by other means.
    pub fn resume_session(&self) {
        let waiters = {
            let mut shared = self.inner.lock();
            if shared.session_ended {
                debug!("session resumed");
            }
            shared.session_ended = false;
            shared.next_generation()
        };
        deliver(waiters, Err(RefreshError::SessionEnded));
    }

    pub fn session_ended(&self) -> bool {
        self.inner.lock().session_ended
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self.inner.lock().state, RefreshState::Refreshing { .. })
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one refresh cycle to completion and settle every waiter.
    async fn run_refresh(&self, generation: u64) {
        info!(path = %self.refresh_path, generation, "refreshing access token");

        let outcome = match tokio::time::timeout(self.timeout, self.refresh_once()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RefreshError::Timeout(self.timeout)),
        };

        self.settle(generation, outcome);
    }

    /// One round-trip to the refresh endpoint. Nothing is persisted here.
    async fn refresh_once(&self) -> std::result::Result<Refreshed, RefreshError> {
        let mut request = ApiRequest::post(&self.refresh_path).json(serde_json::json!({}));
        if self.credential_mode.sends_header()
            && let Some(refresh) = self.store.refresh_token()
        {
            match bearer_header(refresh.expose()) {
                Ok(value) => {
                    request.headers.insert(AUTHORIZATION, value);
                }
                Err(e) => {
                    warn!(error = %e, "stored refresh token is not a valid header value, relying on cookie");
                }
            }
        }

        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        if !response.status.is_success() {
            return Err(RefreshError::Rejected {
                status: response.status,
                body: response.text(),
            });
        }

        let body: RefreshResponse = response
            .json()
            .map_err(|e| RefreshError::Malformed(e.to_string()))?;
        let access = body
            .access_token
            .as_deref()
            .and_then(Secret::non_empty)
            .ok_or_else(|| RefreshError::Malformed("response has no access_token".into()))?;

        Ok(Refreshed {
            access,
            refresh: body.refresh_token.as_deref().and_then(Secret::non_empty),
            user: body.user,
        })
    }

    fn settle(&self, generation: u64, outcome: std::result::Result<Refreshed, RefreshError>) {
        let mut shared = self.lock();
        if shared.generation != generation {
            drop(shared);
            crate::metrics::record_refresh("discarded");
            warn!(generation, "refresh finished after its session ended, discarding result");
            return;
        }

        let waiters = take_waiters(&mut shared);
        let outcome = outcome.and_then(|refreshed| {
            self.persist(&refreshed)?;
            Ok(refreshed.access)
        });

        match outcome {
            Ok(token) => {
                drop(shared);
                crate::metrics::record_refresh("success");
                info!(
                    token_len = token.len(),
                    waiters = waiters.len(),
                    "access token refreshed"
                );
                deliver(waiters, Ok(token));
            }
            Err(error) => {
                shared.session_ended = true;
                shared.generation += 1;
                drop(shared);
                crate::metrics::record_refresh("failure");
                warn!(error = %error, waiters = waiters.len(), "token refresh failed, ending session");
                self.teardown.run();
                deliver(waiters, Err(error));
            }
        }
    }

    /// Write a refreshed credential set. Only the access token is mandatory.
    fn persist(&self, refreshed: &Refreshed) -> std::result::Result<(), RefreshError> {
        self.store
            .set_access_token(&refreshed.access)
            .map_err(|e| RefreshError::Store(e.to_string()))?;

        if let Some(refresh) = &refreshed.refresh
            && let Err(e) = self.store.set_refresh_token(refresh)
        {
            warn!(error = %e, "failed to persist rotated refresh token");
        }
        if let Some(user) = &refreshed.user
            && let Err(e) = self.store.set_user(user)
        {
            warn!(error = %e, "failed to persist refreshed user profile");
        }
        Ok(())
    }
}

/// Return to `Idle`, handing back the full queue.
fn take_waiters(shared: &mut Shared) -> Vec<Waiter> {
    match std::mem::replace(&mut shared.state, RefreshState::Idle) {
        RefreshState::Refreshing { waiters, .. } => waiters,
        RefreshState::Idle => Vec::new(),
    }
}

fn deliver(waiters: Vec<Waiter>, outcome: RefreshResult) {
    for waiter in waiters {
        // A waiter whose caller went away is fine to skip.
        let _ = waiter.send(outcome.clone());
    }
}
