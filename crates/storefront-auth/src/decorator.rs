//! Outgoing request decoration
//!
//! Rules, applied in order:
//! 1. Requests to unauthenticated endpoints (login, register, refresh, the
//!    identity-provider exchange) never carry an Authorization header. This is
//!    what keeps a refresh from triggering another refresh.
//! 2. Multipart bodies lose any preset Content-Type so the transport can write
//!    one with the correct boundary.
//! 3. The stored access credential, if present and non-blank, is attached as
//!    `Authorization: Bearer <credential>`. A missing credential is not an
//!    error here; the protected endpoint will answer 401 and the retry policy
//!    takes it from there.

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, warn};

use crate::constants::{REFRESH_PATH, UNAUTHENTICATED_PATHS};
use crate::request::ApiRequest;
use crate::store::CredentialStore;

/// Attaches the access credential to outgoing requests.
#[derive(Clone)]
pub struct RequestDecorator {
    store: CredentialStore,
    unauthenticated_paths: Vec<String>,
    refresh_path: String,
}

impl RequestDecorator {
    pub fn new(
        store: CredentialStore,
        unauthenticated_paths: Vec<String>,
        refresh_path: impl Into<String>,
    ) -> Self {
        Self {
            store,
            unauthenticated_paths,
            refresh_path: refresh_path.into(),
        }
    }

    /// Decorator using the storefront's built-in endpoint set.
    pub fn with_defaults(store: CredentialStore) -> Self {
        Self::new(
            store,
            UNAUTHENTICATED_PATHS.iter().map(|p| p.to_string()).collect(),
            REFRESH_PATH,
        )
    }

    /// Whether `route` targets an endpoint that must not carry a credential.
    pub fn is_unauthenticated(&self, route: &str) -> bool {
        self.is_refresh(route)
            || self
                .unauthenticated_paths
                .iter()
                .any(|endpoint| route_matches(route, endpoint))
    }

    /// Whether `route` targets the refresh endpoint.
    pub fn is_refresh(&self, route: &str) -> bool {
        route_matches(route, &self.refresh_path)
    }

    /// Apply the decoration rules to an outgoing request. Never blocks.
    pub fn decorate(&self, request: &mut ApiRequest) {
        if self.is_unauthenticated(request.route()) {
            if request.headers.remove(AUTHORIZATION).is_some() {
                debug!(path = %request.path, "dropped authorization header for unauthenticated endpoint");
            }
            return;
        }

        if request.body.is_multipart() {
            request.headers.remove(CONTENT_TYPE);
        }

        match self.store.access_token() {
            Some(token) => {
                if let Err(e) = request.set_bearer(&token) {
                    warn!(path = %request.path, error = %e, "stored access token is not a valid header value, sending without it");
                    return;
                }
                debug!(path = %request.path, token_len = token.len(), "attached access token");
            }
            None => {
                debug!(path = %request.path, "no access token stored, sending unauthenticated");
            }
        }
    }
}

/// Match a request route against a configured endpoint path.
///
/// Exact match, or the route ends with the endpoint (a base path prefix such
/// as `/v2` in front of `/auth/login`).
fn route_matches(route: &str, endpoint: &str) -> bool {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.is_empty() {
        return false;
    }
    route == endpoint || (endpoint.starts_with('/') && route.ends_with(endpoint))
}
