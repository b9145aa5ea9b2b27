//! Rules management for the streaming API.
//!
//! The streaming server address and key come from `streaming.getServerUrl`,
//! called through a service-token session. Rules are then managed with plain
//! JSON requests against `https://{endpoint}/rules?key={key}`. Consuming the
//! websocket stream is left to the caller; [`StreamingRules::stream_url`]
//! gives its address.

use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::OnceCell;
use url::Url;

use crate::api::values::CallArgs;
use crate::error::{VkError, VkResult};
use crate::session::Session;
use crate::transport::{RequestBody, TransportError, TransportRequest};

/// `code` values of streaming responses.
pub mod content_code {
    pub const EVENT: i64 = 100;
    pub const SUCCESSFUL_EXECUTION: i64 = 200;
    pub const SERVICE_MESSAGE: i64 = 300;
    pub const ERROR: i64 = 400;
}

#[derive(Debug, Error)]
pub enum StreamingError {
    #[error("streaming rule request rejected (code {code}): {message}")]
    Rejected { code: i64, message: String },
    #[error("streaming server url is missing from {0}")]
    MissingServer(String),
}

/// Filtering rule: matching events are delivered with `tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingRule {
    pub value: String,
    pub tag: String,
}

/// Streaming server address and access key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StreamingServer {
    pub endpoint: String,
    pub key: String,
}

#[derive(Debug, Deserialize)]
struct StreamingReply {
    code: i64,
    #[serde(default)]
    rules: Option<Vec<StreamingRule>>,
    #[serde(default)]
    error: Option<StreamingReplyError>,
}

#[derive(Debug, Deserialize)]
struct StreamingReplyError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    error_code: Option<i64>,
}

/// Client for the rules endpoint of the streaming API.
pub struct StreamingRules {
    session: Session,
    server: OnceCell<StreamingServer>,
}

impl StreamingRules {
    /// The server address is looked up on first use.
    pub fn new(session: Session) -> Self {
        Self {
            session,
            server: OnceCell::new(),
        }
    }

    /// Rules client for a pre-issued service token.
    pub fn with_service_token(token: impl Into<String>) -> VkResult<Self> {
        let session = Session::builder().with_service_token(token).build()?;
        Ok(Self::new(session))
    }

    /// Server address and key, fetched once per client.
    pub async fn server(&self) -> VkResult<&StreamingServer> {
        self.server
            .get_or_try_init(|| async {
                let value = self
                    .session
                    .api()
                    .path("streaming.getServerUrl")
                    .invoke(CallArgs::new())
                    .await?;
                serde_json::from_value::<StreamingServer>(value.clone())
                    .map_err(|_| VkError::from(StreamingError::MissingServer(value.to_string())))
            })
            .await
    }

    fn rules_url(server: &StreamingServer) -> VkResult<Url> {
        let mut url = Url::parse(&format!("https://{}/rules", server.endpoint))?;
        url.query_pairs_mut().append_pair("key", &server.key);
        Ok(url)
    }

    /// Websocket address of the event stream.
    pub async fn stream_url(&self) -> VkResult<Url> {
        let server = self.server().await?;
        let mut url = Url::parse(&format!("wss://{}/stream", server.endpoint))?;
        url.query_pairs_mut().append_pair("key", &server.key);
        Ok(url)
    }

    async fn request(&self, method: Method, body: RequestBody) -> VkResult<StreamingReply> {
        let url = Self::rules_url(self.server().await?)?;
        let request = TransportRequest::new(method, url).with_body(body);

        let text = match self.session.transport().send(request).await {
            Ok(response) => response.text(),
            Err(TransportError::Status { status, body, .. }) if (400..500).contains(&status) => body,
            Err(err) => return Err(err.into()),
        };

        let reply: StreamingReply = serde_json::from_str(&text)?;
        if reply.code != content_code::SUCCESSFUL_EXECUTION {
            let (message, code) = match reply.error {
                Some(error) => (error.message, error.error_code.unwrap_or(reply.code)),
                None => (text.clone(), reply.code),
            };
            return Err(StreamingError::Rejected { code, message }.into());
        }
        Ok(reply)
    }

    pub async fn add_rule(&self, value: impl Into<String>, tag: impl Into<String>) -> VkResult<()> {
        let rule = StreamingRule {
            value: value.into(),
            tag: tag.into(),
        };
        log::debug!("adding streaming rule {}", rule.tag);
        self.request(Method::POST, RequestBody::Json(json!({ "rule": rule })))
            .await?;
        Ok(())
    }

    pub async fn get_rules(&self) -> VkResult<Vec<StreamingRule>> {
        let reply = self.request(Method::GET, RequestBody::Empty).await?;
        Ok(reply.rules.unwrap_or_default())
    }

    pub async fn remove_rule(&self, tag: impl Into<String>) -> VkResult<()> {
        let tag = tag.into();
        log::debug!("removing streaming rule {tag}");
        self.request(Method::DELETE, RequestBody::Json(json!({ "tag": tag })))
            .await?;
        Ok(())
    }
}
