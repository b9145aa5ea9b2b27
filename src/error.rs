//! Crate-wide error type.
//!
//! Every layer keeps its own `thiserror` enum; [`VkError`] gathers them so the
//! caller can tell a remote API failure from a broken login page or a dead
//! connection without string matching.

use thiserror::Error;

use crate::api::DispatchError;
use crate::api::response::RemoteError;
use crate::api::values::ValueError;
use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::parsers::ParseError;
use crate::resolvers::ResolverError;
use crate::streaming::StreamingError;
use crate::transport::TransportError;

/// Result alias used across the crate.
pub type VkResult<T> = Result<T, VkError>;

/// Top-level error surfaced to callers.
#[derive(Debug, Error)]
pub enum VkError {
    #[error("api error: {0}")]
    Remote(#[from] RemoteError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid method arguments: {0}")]
    Value(#[from] ValueError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("challenge resolution failed: {0}")]
    Resolver(#[from] ResolverError),
    #[error("streaming api error: {0}")]
    Streaming(#[from] StreamingError),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("json decode error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected response body: {0}")]
    UnexpectedResponse(String),
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl VkError {
    /// Remote API error, if this is one.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            VkError::Remote(err) => Some(err),
            _ => None,
        }
    }

    /// `true` when the login page carried a server warning banner
    /// (rate limiting, wrong digits, ...).
    pub fn is_page_warning(&self) -> bool {
        matches!(self, VkError::Parse(ParseError::PageWarnings(_)))
    }

    /// `true` when a challenge needed a human and the session is not
    /// interactive.
    pub fn is_manual_input_required(&self) -> bool {
        matches!(
            self,
            VkError::Resolver(ResolverError::ManualInputRequired(_))
                | VkError::Auth(AuthError::PhoneRequired { .. })
        )
    }
}
