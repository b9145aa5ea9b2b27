//! HTTP transport abstraction.
//!
//! The auth engine and the dispatcher only talk to [`HttpTransport`]; the
//! reqwest binding lives in [`reqwest_client`]. Implementations must keep
//! cookies between calls, the multi-step login depends on it.

pub mod reqwest_client;

#[cfg(test)]
pub(crate) mod stub;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

pub use reqwest_client::ReqwestTransport;

/// Form fields never written to the debug log in clear text.
const SENSITIVE_FIELDS: &[&str] = &["pass", "password", "access_token", "client_secret", "code"];

/// Contract for the underlying HTTP client.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform one request, following redirects.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;

    /// Cookies the client would send to `url`.
    fn cookies(&self, url: &Url) -> Vec<(String, String)>;

    /// A new client with the same configuration and an empty cookie jar.
    fn fresh_session(&self) -> Result<Arc<dyn HttpTransport>, TransportError>;
}

/// Outgoing payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
}

/// Single request handed to a transport.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub body: RequestBody,
    pub timeout: Option<Duration>,
}

impl TransportRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            body: RequestBody::Empty,
            timeout: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post_form<I, K, V>(url: Url, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let fields = fields
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self::new(Method::POST, url).with_body(RequestBody::Form(fields))
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Value of a form field, if the body is a form.
    pub fn form_value(&self, key: &str) -> Option<&str> {
        match &self.body {
            RequestBody::Form(fields) => fields
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.as_str()),
            _ => None,
        }
    }

    /// Body rendering for logs, with credentials masked.
    pub fn describe_body(&self) -> String {
        match &self.body {
            RequestBody::Empty => "-".into(),
            RequestBody::Form(fields) => {
                let rendered: Vec<String> = fields
                    .iter()
                    .map(|(name, value)| {
                        if SENSITIVE_FIELDS.contains(&name.as_str()) {
                            format!("{name}=***")
                        } else {
                            format!("{name}={value}")
                        }
                    })
                    .collect();
                format!("{{{}}}", rendered.join(", "))
            }
            RequestBody::Json(value) => value.to_string(),
        }
    }
}

/// Response as seen by the session layers.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Cookies held for `url` once the response was processed.
    pub cookies: Vec<(String, String)>,
}

impl TransportResponse {
    pub fn new(status: u16, url: Url, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            url,
            headers: HeaderMap::new(),
            body: body.into(),
            cookies: Vec::new(),
        }
    }

    pub fn with_cookies(mut self, cookies: Vec<(String, String)>) -> Self {
        self.cookies = cookies;
        self
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn has_cookie(&self, name: &str) -> bool {
        self.cookies.iter().any(|(cookie, _)| cookie == name)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{url} answered with http status {status}")]
    Status { status: u16, url: Url, body: String },
    #[error("request to {0} timed out")]
    Timeout(Url),
    #[error("http transport error: {0}")]
    Request(String),
    #[error("invalid header '{0}'")]
    InvalidHeader(String),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Split a `Cookie` header value (`a=1; b=2`) into pairs.
pub(crate) fn parse_cookie_header(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_body_masks_credentials() {
        let request = TransportRequest::post_form(
            Url::parse("https://m.vk.com/login").unwrap(),
            [("email", "user@example.com"), ("pass", "hunter2")],
        );
        let rendered = request.describe_body();
        assert!(rendered.contains("email=user@example.com"));
        assert!(rendered.contains("pass=***"));
        assert!(!rendered.contains("hunter2"));
        assert_eq!(request.form_value("pass"), Some("hunter2"));
    }

    #[test]
    fn cookie_header_is_split_into_pairs() {
        let cookies = parse_cookie_header("remixsid=abc; remixlang=0;broken; =x");
        assert_eq!(
            cookies,
            vec![
                ("remixsid".to_string(), "abc".to_string()),
                ("remixlang".to_string(), "0".to_string()),
            ]
        );
    }
}
