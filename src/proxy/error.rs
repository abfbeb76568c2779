// src/proxy/error.rs
use hyper::StatusCode;
use std::error::Error as _;
use std::time::Duration;

use super::request::ProxyResponse;

/// Errors surfaced by the proxy core.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no available backends")]
    NoAvailableBackends,

    #[error("backend not found: {0}")]
    BackendNotFound(String),

    #[error("backend already exists: {0}")]
    BackendExists(String),

    #[error("invalid backend: {0}")]
    InvalidBackend(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("circuit breaker is open for backend {0}")]
    CircuitOpen(String),

    #[error("backend {backend} unreachable")]
    Transport {
        backend: String,
        #[source]
        source: hyper::Error,
    },

    #[error("backend {backend} timed out after {after:?}")]
    Timeout { backend: String, after: Duration },

    #[error("backend {backend} returned {status}")]
    BackendStatus {
        backend: String,
        status: StatusCode,
        response: Box<ProxyResponse>,
    },

    #[error("all {attempts} attempts failed")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<ProxyError>,
    },
}

impl ProxyError {
    /// The backend response attached to a 5xx failure, looking through
    /// `RetriesExhausted` wrappers.
    pub fn response(&self) -> Option<&ProxyResponse> {
        match self {
            ProxyError::BackendStatus { response, .. } => Some(response.as_ref()),
            ProxyError::RetriesExhausted { source, .. } => source.response(),
            _ => None,
        }
    }

    /// The innermost proxy error in a `RetriesExhausted` chain.
    pub fn root_cause(&self) -> &ProxyError {
        match self {
            ProxyError::RetriesExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// True when the failure says nothing could serve the request.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ProxyError::NoAvailableBackends
                | ProxyError::RetriesExhausted { .. }
                | ProxyError::CircuitOpen(_)
        )
    }

    /// Status the HTTP front should answer with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self.root_cause() {
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ if self.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Renders the error and its full source chain on one line.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = self.source();
        while let Some(err) = source {
            out.push_str(": ");
            out.push_str(&err.to_string());
            source = err.source();
        }
        out
    }
}
