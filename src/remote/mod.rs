//! Remote side of replay: the transport seam and the mutation → request mapping.

pub mod dispatcher;
#[cfg(feature = "http")]
pub mod http;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RemoteError;

pub use dispatcher::{Dispatcher, ResourceMap};
#[cfg(feature = "http")]
pub use http::HttpTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single network call derived from a queued mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub method: HttpMethod,
    /// Path relative to the API base, e.g. `/patients/42`.
    pub path: String,
    pub body: Option<Value>,
}

/// User-provided network layer.
///
/// Implementations perform exactly one call per `send` and report any non-2xx
/// answer as `RemoteError::Rejected`. Response bodies are not inspected.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn send(&self, request: &RemoteRequest) -> Result<(), RemoteError>;
}
