//! Storefront API constants
//!
//! Endpoint paths are relative to the configured API base URL. The three
//! credential store keys are shared with the UI layer, which reads them to
//! render authenticated state.

/// Default API base URL when neither config nor `STOREFRONT_API_URL` sets one
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";

/// Email/password login (unauthenticated)
pub const LOGIN_PATH: &str = "/auth/login";

/// Account registration (unauthenticated)
pub const REGISTER_PATH: &str = "/auth/register";

/// Access credential refresh (unauthenticated, refresh credential only)
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Identity-provider token exchange (unauthenticated)
pub const GOOGLE_AUTH_PATH: &str = "/auth/google";

/// Current user profile
pub const ME_PATH: &str = "/auth/me";

/// Customer profile completeness check
pub const PROFILE_COMPLETE_PATH: &str = "/auth/check-profile-complete";

/// Store key for the short-lived access credential
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Store key for the longer-lived refresh credential
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Store key for the cached user profile blob
pub const USER_KEY: &str = "user";

/// Route the application returns to after the session ends
pub const LANDING_ROUTE: &str = "/";

/// Upper bound on a single refresh round-trip, in seconds
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;

/// Per-request transport timeout, in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Endpoints that never carry the access credential and never trigger a refresh.
pub const UNAUTHENTICATED_PATHS: &[&str] =
    &[LOGIN_PATH, REGISTER_PATH, REFRESH_PATH, GOOGLE_AUTH_PATH];
