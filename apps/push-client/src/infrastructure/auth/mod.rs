//! Session Authenticator
//!
//! Obtains and renews the session that both the REST side and the push
//! socket hang off. A successful login yields a security token, a push
//! subscription id, and a customer id; renewal is scheduled shortly
//! before the configured inactivity timeout elapses and retries
//! indefinitely with backoff until it succeeds or the client disconnects.
//!
//! Every successful (re)authentication emits
//! [`SessionEvent::Authenticated`] so the client can restart the
//! transport: a live socket authorized under an old subscription id is
//! not usable after re-auth.
//!
//! # Login Flow
//!
//! 1. `POST <login_path>` with username, password and the requested
//!    inactivity timeout.
//! 2. If the response carries a `secondFactor` object, compute or accept
//!    a one-time code and `POST <second_factor_path>`.
//! 3. The final response carries `securityToken`, `pushSubscriptionId`
//!    and `customerId`.

pub mod totp;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Method, RestPort};
use crate::domain::session::{Credentials, SecondFactor, Session, SessionStore};
use crate::infrastructure::bayeux::backoff::BackoffScheduler;
use crate::infrastructure::config::AuthSettings;

/// Backoff action name for renewal retries.
const REAUTH_ACTION: &str = "reauth";

/// Errors surfaced to callers of `authenticate`.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Username or password missing.
    #[error("missing credential field: {0}")]
    MissingCredentials(&'static str),

    /// Configured inactivity timeout outside policy bounds.
    #[error(
        "inactivity timeout {configured:?} outside accepted range {min:?}..={max:?}"
    )]
    InactivityTimeoutOutOfRange {
        /// Configured value.
        configured: Duration,
        /// Policy minimum.
        min: Duration,
        /// Policy maximum.
        max: Duration,
    },

    /// Server demanded a second factor but neither a code nor a shared
    /// secret was supplied.
    #[error("second factor required but no one-time code or shared secret supplied")]
    SecondFactorMissing,

    /// Server demanded a second-factor method this client cannot serve.
    #[error("unsupported second-factor method: {0}")]
    UnsupportedSecondFactor(String),

    /// Shared secret could not produce a one-time code.
    #[error("one-time code generation failed: {0}")]
    Totp(#[from] totp::TotpError),

    /// Server rejected the request.
    #[error("authentication rejected: {0}")]
    Rejected(#[from] crate::application::ports::RestError),

    /// Response body lacked a required field.
    #[error("malformed authentication response: missing {0}")]
    MalformedResponse(&'static str),
}

/// Events emitted by the authenticator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A (re)authentication succeeded; the transport must restart so the
    /// socket picks up the fresh subscription id.
    Authenticated,
    /// The client disconnected; tear everything down.
    Disconnected,
}

/// Obtains and renews the client session.
pub struct Authenticator {
    rest: Arc<dyn RestPort>,
    session: Arc<SessionStore>,
    settings: AuthSettings,
    backoff: Arc<BackoffScheduler>,
    event_tx: mpsc::Sender<SessionEvent>,
    last_credentials: Mutex<Option<Credentials>>,
    reauth_cancel: Mutex<Option<CancellationToken>>,
    renewal_attempts: AtomicU32,
}

impl Authenticator {
    /// Create an authenticator.
    #[must_use]
    pub fn new(
        rest: Arc<dyn RestPort>,
        session: Arc<SessionStore>,
        settings: AuthSettings,
        backoff: Arc<BackoffScheduler>,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            rest,
            session,
            settings,
            backoff,
            event_tx,
            last_credentials: Mutex::new(None),
            reauth_cancel: Mutex::new(None),
            renewal_attempts: AtomicU32::new(0),
        }
    }

    /// The shared session store.
    #[must_use]
    pub fn session(&self) -> Arc<SessionStore> {
        Arc::clone(&self.session)
    }

    /// Number of background renewal attempts made so far.
    #[must_use]
    pub fn renewal_attempts(&self) -> u32 {
        self.renewal_attempts.load(Ordering::SeqCst)
    }

    /// Authenticate with primary credentials, handling a demanded second
    /// factor.
    ///
    /// On success the session store is populated, a renewal is armed
    /// before the inactivity timeout elapses, and
    /// [`SessionEvent::Authenticated`] is emitted.
    ///
    /// # Errors
    ///
    /// Rejects synchronously on missing credential fields, an
    /// out-of-range inactivity timeout, a demanded second factor without
    /// input for it, an unsupported second-factor method, or a server
    /// rejection. On any failure the session is left unauthenticated.
    pub async fn authenticate(
        self: Arc<Self>,
        credentials: Credentials,
    ) -> Result<Session, AuthError> {
        match self.try_authenticate(&credentials).await {
            Ok(session) => {
                *self.last_credentials.lock() = Some(credentials);
                Arc::clone(&self).arm_renewal(
                    self.settings
                        .inactivity_timeout
                        .saturating_sub(self.settings.reauth_margin),
                );
                let _ = self.event_tx.send(SessionEvent::Authenticated).await;
                metrics::counter!("push_client_authentications_total").increment(1);
                Ok(session)
            }
            Err(e) => {
                self.session.invalidate();
                Err(e)
            }
        }
    }

    /// One authentication round trip, without scheduling side effects.
    async fn try_authenticate(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        if credentials.username().is_empty() {
            return Err(AuthError::MissingCredentials("username"));
        }
        if credentials.password().is_empty() {
            return Err(AuthError::MissingCredentials("password"));
        }

        let timeout = self.settings.inactivity_timeout;
        if timeout < self.settings.min_inactivity_timeout
            || timeout > self.settings.max_inactivity_timeout
        {
            return Err(AuthError::InactivityTimeoutOutOfRange {
                configured: timeout,
                min: self.settings.min_inactivity_timeout,
                max: self.settings.max_inactivity_timeout,
            });
        }

        let body = serde_json::json!({
            "username": credentials.username(),
            "password": credentials.password(),
            "maxInactiveSeconds": timeout.as_secs(),
        });
        let mut response = self
            .rest
            .call(Method::Post, &self.settings.login_path, Some(body))
            .await?;

        if let Some(second_factor) = response.get("secondFactor") {
            let method = second_factor
                .get("method")
                .and_then(|m| m.as_str())
                .unwrap_or("")
                .to_string();
            response = self.submit_second_factor(credentials, &method).await?;
        }

        let session = Self::session_from_response(&response, timeout)?;
        self.session.set(session.clone());
        tracing::info!(customer_id = %session.customer_id, "Session authenticated");
        Ok(session)
    }

    /// Resolve and submit the one-time code.
    ///
    /// Input validation happens before any second-factor network call.
    async fn submit_second_factor(
        &self,
        credentials: &Credentials,
        method: &str,
    ) -> Result<serde_json::Value, AuthError> {
        if !method.eq_ignore_ascii_case("totp") {
            return Err(AuthError::UnsupportedSecondFactor(method.to_string()));
        }

        let code = match credentials.second_factor() {
            Some(SecondFactor::Totp(code)) => code.clone(),
            Some(SecondFactor::TotpSecret(secret)) => totp::totp_now(secret)?,
            None => return Err(AuthError::SecondFactorMissing),
        };

        let body = serde_json::json!({
            "method": "TOTP",
            "totpCode": code,
        });
        let response = self
            .rest
            .call(Method::Post, &self.settings.second_factor_path, Some(body))
            .await?;
        Ok(response)
    }

    /// Extract the session from a successful login response.
    fn session_from_response(
        response: &serde_json::Value,
        timeout: Duration,
    ) -> Result<Session, AuthError> {
        let field = |name: &'static str| {
            response
                .get(name)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .ok_or(AuthError::MalformedResponse(name))
        };

        Ok(Session {
            security_token: field("securityToken")?,
            subscription_id: field("pushSubscriptionId")?,
            customer_id: field("customerId")?,
            authenticated: true,
            expires_at: Utc::now()
                + chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::zero()),
        })
    }

    /// Cancel any pending renewal and arm a new one after `delay`.
    ///
    /// When the timer fires, the last-used credentials are replayed; on
    /// renewal failure the task re-arms itself through the backoff
    /// scheduler and retries until it succeeds or the client disconnects.
    pub fn arm_renewal(self: Arc<Self>, delay: Duration) {
        let cancel = CancellationToken::new();
        if let Some(previous) = self.reauth_cancel.lock().replace(cancel.clone()) {
            previous.cancel();
        }

        let this = self;
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            this.renew_until_done(cancel).await;
        });
    }

    /// Renewal loop: retry with backoff until success or cancellation.
    async fn renew_until_done(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let Some(credentials) = self.last_credentials.lock().clone() else {
                tracing::debug!("No stored credentials, skipping renewal");
                return;
            };

            self.renewal_attempts.fetch_add(1, Ordering::SeqCst);
            match self.try_authenticate(&credentials).await {
                Ok(_) => {
                    Arc::clone(&self).arm_renewal(
                        self.settings
                            .inactivity_timeout
                            .saturating_sub(self.settings.reauth_margin),
                    );
                    let _ = self.event_tx.send(SessionEvent::Authenticated).await;
                    metrics::counter!("push_client_renewals_total").increment(1);
                    return;
                }
                Err(e) => {
                    self.session.invalidate();
                    let delay = self.backoff.delay_for(REAUTH_ACTION);
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = delay.as_millis(),
                        "Session renewal failed"
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Cancel the pending renewal and clear the session.
    ///
    /// Emits [`SessionEvent::Disconnected`] so the client tears the
    /// transport and listeners down.
    pub async fn disconnect(&self) {
        if let Some(cancel) = self.reauth_cancel.lock().take() {
            cancel.cancel();
        }
        *self.last_credentials.lock() = None;
        self.session.clear();
        let _ = self.event_tx.send(SessionEvent::Disconnected).await;
        tracing::info!("Session disconnected");
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("authenticated", &self.session.is_authenticated())
            .field("renewal_attempts", &self.renewal_attempts())
            .finish()
    }
}
