//! Authenticated storefront client
//!
//! Every call goes through the same pipeline: decorate, send, classify. A 401
//! or 422 from a protected endpoint gets exactly one refresh-and-retry, gated
//! by the request's own `retried` marker; a second rejection, or any other
//! failure, goes back to the caller unchanged.
//!
//! Unauthenticated endpoints never enter the refresh cycle. The one special
//! case is the refresh endpoint answering 422: the refresh credential itself
//! is invalid, so the session is torn down instead.

use std::sync::Arc;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::classify::{StatusClass, classify};
use crate::config::AuthConfig;
use crate::coordinator::RefreshCoordinator;
use crate::decorator::RequestDecorator;
use crate::error::Result;
use crate::request::{ApiRequest, ApiResponse};
use crate::store::CredentialStore;
use crate::teardown::{Navigator, SessionTeardown};
use crate::transport::Transport;

/// HTTP client that attaches, refreshes and retries the bearer credential.
///
/// Cheap to clone; clones share the store and the refresh coordinator.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    decorator: RequestDecorator,
    coordinator: RefreshCoordinator,
    store: CredentialStore,
}

impl Client {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: CredentialStore,
        navigator: Arc<dyn Navigator>,
        config: &AuthConfig,
    ) -> Self {
        let decorator = RequestDecorator::new(
            store.clone(),
            config.unauthenticated_paths.clone(),
            config.refresh_path.clone(),
        );
        let teardown = SessionTeardown::new(store.clone(), navigator, config.landing_route.clone());
        let coordinator =
            RefreshCoordinator::new(transport.clone(), store.clone(), teardown, config);
        Self {
            transport,
            decorator,
            coordinator,
            store,
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Send a request, refreshing the credential and retrying once on 401/422.
    ///
    /// Non-success responses come back as `Error::Status` with the original
    /// status and body. A failed refresh comes back as `Error::Refresh`.
    #[instrument(skip_all, fields(
        request_id = %format!("req_{}", uuid::Uuid::new_v4().as_simple()),
        method = %request.method,
        path = %request.path,
    ))]
    pub async fn execute(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        self.decorator.decorate(&mut request);

        loop {
            let response = self.transport.send(&request).await?;

            match classify(response.status) {
                StatusClass::Success => {
                    if request.is_retried() {
                        crate::metrics::record_retry("success");
                    }
                    return Ok(response);
                }
                StatusClass::Other => {
                    if request.is_retried() {
                        crate::metrics::record_retry("error");
                    }
                    debug!(status = %response.status, "passing error response through");
                    return Err(response.into_error());
                }
                StatusClass::AuthExpired => {}
            }

            let route = request.route();
            if self.decorator.is_unauthenticated(route) {
                if self.decorator.is_refresh(route)
                    && response.status == StatusCode::UNPROCESSABLE_ENTITY
                {
                    warn!("refresh credential rejected, ending session");
                    self.coordinator.end_session();
                }
                return Err(response.into_error());
            }

            if request.is_retried() {
                crate::metrics::record_retry("auth_rejected");
                warn!(status = %response.status, "credential rejected again after refresh, giving up");
                return Err(response.into_error());
            }

            request.mark_retried();
            debug!(status = %response.status, "credential rejected, requesting refresh");
            let stale = request.bearer_token().map(str::to_owned);
            let token = self.coordinator.request_refresh(stale.as_deref()).await?;
            request.set_bearer(&token)?;
        }
    }

    /// `GET path` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.execute(ApiRequest::get(path)).await?.json()
    }

    /// Send `request` and decode the JSON body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        self.execute(request).await?.json()
    }
}
