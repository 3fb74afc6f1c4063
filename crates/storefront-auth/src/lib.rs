//! Authenticated HTTP client for the storefront API
//!
//! Attaches the bearer access credential to outgoing requests, detects
//! rejected credentials (401/422), and refreshes them with single-flight
//! semantics: however many requests fail at once, one refresh round-trip runs
//! and every request is replayed with its result. A failed refresh ends the
//! session exactly once.
//!
//! Request flow:
//! 1. `RequestDecorator` attaches `Authorization: Bearer <access>` (skipped
//!    for login/register/refresh/identity-provider endpoints)
//! 2. `Transport` sends the request
//! 3. `Client` classifies the response; on 401/422 it asks the
//!    `RefreshCoordinator` for a new credential and retries once
//! 4. On terminal refresh failure `SessionTeardown` clears the
//!    `CredentialStore` and signals the host's `Navigator`

pub mod classify;
pub mod client;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod decorator;
pub mod error;
pub mod metrics;
pub mod request;
pub mod session;
pub mod store;
pub mod teardown;
pub mod transport;

pub use classify::{StatusClass, classify};
pub use client::Client;
pub use config::{AuthConfig, RefreshCredentialMode};
pub use constants::*;
pub use coordinator::RefreshCoordinator;
pub use decorator::RequestDecorator;
pub use error::{Error, RefreshError, Result};
pub use request::{ApiRequest, ApiResponse, MultipartPart, RequestBody};
pub use session::{AuthResponse, ProfileStatus, Session, SignupData, User};
pub use store::{CredentialStore, FileStore, KeyValueStore, MemoryStore};
pub use teardown::{Navigator, RouteChannel, SessionTeardown};
pub use transport::{ReqwestTransport, Transport};
