//! Port Interfaces
//!
//! Contracts to external systems following the Hexagonal Architecture
//! pattern. The core only requires a thin REST contract: a call that
//! resolves to a parsed JSON body or rejects with the status code and
//! headers. Endpoint path construction and payload mapping live outside
//! the core; the authenticator gets its paths from configuration.

use std::collections::HashMap;

use async_trait::async_trait;

/// HTTP method for a REST call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET request.
    Get,
    /// POST request.
    Post,
    /// PUT request.
    Put,
    /// DELETE request.
    Delete,
}

impl Method {
    /// Method name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// Error rejected by a REST call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RestError {
    /// Non-2xx response from the server.
    #[error("HTTP {status_code}: {message}")]
    Status {
        /// HTTP status code.
        status_code: u16,
        /// Response headers.
        headers: HashMap<String, String>,
        /// Response body or status text.
        message: String,
    },

    /// Transport-level failure (DNS, TLS, connection reset).
    #[error("REST transport error: {0}")]
    Transport(String),

    /// Response body was not valid JSON.
    #[error("invalid JSON response: {0}")]
    InvalidBody(String),
}

impl RestError {
    /// Status code, if the server answered at all.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

/// Outbound REST port used by the session authenticator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RestPort: Send + Sync {
    /// Issue a request and resolve to the parsed JSON body.
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, RestError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names() {
        assert_eq!(Method::Get.as_str(), "GET");
        assert_eq!(Method::Post.as_str(), "POST");
    }

    #[test]
    fn rest_error_status_code() {
        let err = RestError::Status {
            status_code: 401,
            headers: HashMap::new(),
            message: "unauthorized".to_string(),
        };
        assert_eq!(err.status_code(), Some(401));
        assert_eq!(RestError::Transport("reset".to_string()).status_code(), None);
    }
}
