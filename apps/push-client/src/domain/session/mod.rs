//! Session Aggregate
//!
//! One authenticated session per client instance. The session is created
//! by the authenticator on a successful login, mutated only by the
//! authenticator, and invalidated on detected invalid-session responses
//! or an explicit disconnect.
//!
//! The security token authorizes REST calls; the subscription id binds
//! the push socket's authorization to the REST session. A live socket
//! authorized under an old subscription id is unusable after re-auth,
//! which is why re-authentication always restarts the transport.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Login credentials, held only so the renewal path can re-authenticate.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
    second_factor: Option<SecondFactor>,
}

/// Second-factor input supplied alongside the primary credentials.
#[derive(Clone)]
pub enum SecondFactor {
    /// A pre-computed one-time code.
    Totp(String),
    /// A base32 shared secret the client derives codes from.
    TotpSecret(String),
}

impl Credentials {
    /// Create credentials from a username and password.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            second_factor: None,
        }
    }

    /// Attach a pre-computed one-time code.
    #[must_use]
    pub fn with_totp(mut self, code: impl Into<String>) -> Self {
        self.second_factor = Some(SecondFactor::Totp(code.into()));
        self
    }

    /// Attach a base32 shared secret for deriving one-time codes.
    #[must_use]
    pub fn with_totp_secret(mut self, secret: impl Into<String>) -> Self {
        self.second_factor = Some(SecondFactor::TotpSecret(secret.into()));
        self
    }

    /// Username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Second-factor input, if any.
    #[must_use]
    pub const fn second_factor(&self) -> Option<&SecondFactor> {
        self.second_factor.as_ref()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("second_factor", &self.second_factor.is_some())
            .finish()
    }
}

/// An authenticated session.
#[derive(Clone)]
pub struct Session {
    /// Token authorizing REST calls.
    pub security_token: String,
    /// Token binding the push socket to this session.
    pub subscription_id: String,
    /// Customer identifier returned by the login endpoint.
    pub customer_id: String,
    /// Whether the session is currently valid.
    pub authenticated: bool,
    /// When the session expires absent renewal.
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("security_token", &"[REDACTED]")
            .field("subscription_id", &"[REDACTED]")
            .field("customer_id", &self.customer_id)
            .field("authenticated", &self.authenticated)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Shared holder for the client's single session.
///
/// Constructed empty, populated by `authenticate`, torn down by
/// `disconnect`. Readers get clones; only the authenticator writes.
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: RwLock<Option<Session>>,
}

impl SessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the session after a successful authentication.
    pub fn set(&self, session: Session) {
        *self.inner.write() = Some(session);
    }

    /// Snapshot of the current session, if any.
    #[must_use]
    pub fn get(&self) -> Option<Session> {
        self.inner.read().clone()
    }

    /// Whether an authenticated session is present.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.read().as_ref().is_some_and(|s| s.authenticated)
    }

    /// Subscription id for the push socket's handshake extension.
    #[must_use]
    pub fn subscription_id(&self) -> Option<String> {
        self.inner
            .read()
            .as_ref()
            .filter(|s| s.authenticated)
            .map(|s| s.subscription_id.clone())
    }

    /// Mark the session unauthenticated and drop its tokens.
    pub fn invalidate(&self) {
        let mut guard = self.inner.write();
        if let Some(session) = guard.as_mut() {
            session.authenticated = false;
            session.security_token.clear();
        }
    }

    /// Mark the push binding invalid after a fatal handshake rejection.
    ///
    /// The REST token may still be valid; only the subscription id is
    /// known-bad, and re-auth will mint a fresh one.
    pub fn invalidate_push(&self) {
        let mut guard = self.inner.write();
        if let Some(session) = guard.as_mut() {
            session.subscription_id.clear();
        }
    }

    /// Drop the session entirely (explicit disconnect).
    pub fn clear(&self) {
        *self.inner.write() = None;
    }
}
