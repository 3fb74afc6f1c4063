//! Session teardown
//!
//! Terminal side effect of a failed refresh: forget every credential and send
//! the application back to its unauthenticated landing route. Navigation goes
//! through the `Navigator` port so the host decides what "go to landing" means
//! (a UI router, a CLI prompt, a test probe).

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::constants::LANDING_ROUTE;
use crate::store::CredentialStore;

/// Host application navigation capability.
///
/// `navigate` must be idempotent; teardown may be reached from contexts that
/// are already on their way to the landing route.
pub trait Navigator: Send + Sync {
    fn current_route(&self) -> String;

    fn navigate(&self, route: &str);
}

/// `Navigator` backed by a watch channel.
///
/// The host subscribes and reacts to route changes; the latest route is always
/// readable, even with no subscriber attached.
#[derive(Debug)]
pub struct RouteChannel {
    tx: watch::Sender<String>,
}

impl RouteChannel {
    pub fn new(initial: impl Into<String>) -> (Self, watch::Receiver<String>) {
        let (tx, rx) = watch::channel(initial.into());
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Navigator for RouteChannel {
    fn current_route(&self) -> String {
        self.tx.borrow().clone()
    }

    fn navigate(&self, route: &str) {
        self.tx.send_replace(route.to_string());
    }
}

/// Clears the session and returns the host to its landing route.
#[derive(Clone)]
pub struct SessionTeardown {
    store: CredentialStore,
    navigator: Arc<dyn Navigator>,
    landing_route: String,
}

impl SessionTeardown {
    pub fn new(
        store: CredentialStore,
        navigator: Arc<dyn Navigator>,
        landing_route: impl Into<String>,
    ) -> Self {
        Self {
            store,
            navigator,
            landing_route: landing_route.into(),
        }
    }

    pub fn with_default_landing(store: CredentialStore, navigator: Arc<dyn Navigator>) -> Self {
        Self::new(store, navigator, LANDING_ROUTE)
    }

    /// Clear all session keys and navigate to the landing route if not already there.
    pub fn run(&self) {
        if let Err(e) = self.store.clear_session() {
            warn!(error = %e, "failed to clear stored session during teardown");
        }
        crate::metrics::record_teardown();

        let current = self.navigator.current_route();
        if current == self.landing_route {
            info!(route = %current, "session ended, already on landing route");
        } else {
            info!(from = %current, to = %self.landing_route, "session ended, returning to landing route");
            self.navigator.navigate(&self.landing_route);
        }
    }
}
