//! REST Adapter
//!
//! `reqwest`-backed implementation of the [`RestPort`] contract. The core
//! only needs parsed JSON bodies back and status/header detail on
//! failure; endpoint semantics belong to the layers above. When a session
//! is present its security token rides along as a header.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::application::ports::{Method, RestError, RestPort};
use crate::domain::session::SessionStore;

/// Header carrying the session's security token.
pub const SECURITY_TOKEN_HEADER: &str = "x-security-token";

/// HTTP adapter for the REST port.
#[derive(Debug, Clone)]
pub struct HttpRestClient {
    http: reqwest::Client,
    base_url: String,
    session: Arc<SessionStore>,
}

impl HttpRestClient {
    /// Create an adapter for a base URL sharing the client's session
    /// store.
    #[must_use]
    pub fn new(base_url: impl Into<String>, session: Arc<SessionStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            session,
        }
    }

    /// Join the base URL and a path.
    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl RestPort for HttpRestClient {
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, RestError> {
        let url = self.endpoint(path);
        let mut request = match method {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
            Method::Put => self.http.put(&url),
            Method::Delete => self.http.delete(&url),
        };

        if let Some(session) = self.session.get()
            && session.authenticated
        {
            request = request.header(SECURITY_TOKEN_HEADER, session.security_token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RestError::Transport(e.to_string()))?;

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let text = response
            .text()
            .await
            .map_err(|e| RestError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(RestError::Status {
                status_code: status.as_u16(),
                headers,
                message: text,
            });
        }

        if text.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| RestError::InvalidBody(e.to_string()))
    }
}
