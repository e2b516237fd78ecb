//! Runtime settings shared by the middleware, guard, and admin handlers.

use time::Duration;

/// Query string parameter carrying the visitor token.
pub const VISITOR_QUERYSTRING_KEY: &str = "vuid";
/// Session key under which visitor session data is stored.
pub const VISITOR_SESSION_KEY: &str = "visitor:session";

const DEFAULT_SESSION_EXPIRY_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_TOKEN_EXPIRY_SECONDS: i64 = 24 * 60 * 60;
/// Upper bound for session and token lifetimes (ten years).
pub const MAX_EXPIRY_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct VisitorConfig {
    querystring_key: String,
    session_key: String,
    session_expiry_seconds: i64,
    token_expiry_seconds: i64,
    session_cookie_secure: bool,
}

impl Default for VisitorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl VisitorConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            querystring_key: VISITOR_QUERYSTRING_KEY.to_string(),
            session_key: VISITOR_SESSION_KEY.to_string(),
            session_expiry_seconds: DEFAULT_SESSION_EXPIRY_SECONDS,
            token_expiry_seconds: DEFAULT_TOKEN_EXPIRY_SECONDS,
            session_cookie_secure: true,
        }
    }

    /// Only disable when the service is reached over plain HTTP.
    #[must_use]
    pub fn with_session_cookie_secure(mut self, secure: bool) -> Self {
        self.session_cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.session_cookie_secure
    }

    #[must_use]
    pub fn with_querystring_key(mut self, key: String) -> Self {
        self.querystring_key = key;
        self
    }

    #[must_use]
    pub fn with_session_key(mut self, key: String) -> Self {
        self.session_key = key;
        self
    }

    /// Clamped to `1..=MAX_EXPIRY_SECONDS`.
    #[must_use]
    pub fn with_session_expiry_seconds(mut self, seconds: i64) -> Self {
        self.session_expiry_seconds = seconds.clamp(1, MAX_EXPIRY_SECONDS);
        self
    }

    /// Zero disables token expiry for newly created visitors. Clamped to
    /// `MAX_EXPIRY_SECONDS`.
    #[must_use]
    pub fn with_token_expiry_seconds(mut self, seconds: i64) -> Self {
        self.token_expiry_seconds = seconds.clamp(0, MAX_EXPIRY_SECONDS);
        self
    }

    #[must_use]
    pub fn querystring_key(&self) -> &str {
        &self.querystring_key
    }

    #[must_use]
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    #[must_use]
    pub fn session_expiry(&self) -> Duration {
        Duration::seconds(self.session_expiry_seconds)
    }

    #[must_use]
    pub fn token_expiry(&self) -> Option<Duration> {
        (self.token_expiry_seconds > 0).then(|| Duration::seconds(self.token_expiry_seconds))
    }
}
