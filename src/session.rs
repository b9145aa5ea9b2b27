//! Session orchestration.
//!
//! Wires the transport, the auth engine and the challenge resolver together
//! and runs method calls, recovering from captcha requests and rejected
//! credentials by re-issuing the same call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use url::Url;

use crate::api::response::{ResponseOutcome, interpret_body};
use crate::api::values::{CallArgs, to_form_fields};
use crate::api::{Api, MethodCall};
use crate::auth::{AuthEngine, Credential};
use crate::config::{Endpoints, HttpParams, Scope, SessionConfig};
use crate::error::{VkError, VkResult};
use crate::events::{EventDispatcher, EventHandler, SessionEvent};
use crate::resolvers::{CaptchaTask, ChallengeResolver, ResolverError, default_resolver};
use crate::transport::{HttpTransport, ReqwestTransport, TransportRequest};

/// Longest body excerpt quoted in errors.
const BODY_EXCERPT: usize = 200;

/// Fluent builder for [`Session`].
pub struct SessionBuilder {
    config: SessionConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    resolver: Option<Arc<dyn ChallengeResolver>>,
    handlers: Vec<Arc<dyn EventHandler>>,
    log_events: bool,
    default_args: CallArgs,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            transport: None,
            resolver: None,
            handlers: Vec::new(),
            log_events: true,
            default_args: CallArgs::new(),
        }
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.config.app_id = Some(app_id.into());
        self
    }

    pub fn with_login(mut self, login: impl Into<String>) -> Self {
        self.config.login = Some(login.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    pub fn with_phone_number(mut self, phone_number: impl Into<String>) -> Self {
        self.config.phone_number = Some(phone_number.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<Scope>) -> Self {
        self.config.scope = scope.into();
        self
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.config.api_version = version.into();
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.config.interactive = interactive;
        self
    }

    pub fn with_service_token(mut self, token: impl Into<String>) -> Self {
        self.config.service_token = Some(token.into());
        self
    }

    /// Switches credential acquisition to the direct password grant.
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.client_secret = Some(secret.into());
        self
    }

    pub fn with_two_factor(mut self, supported: bool, force_sms: bool) -> Self {
        self.config.two_factor_supported = supported;
        self.config.force_sms = force_sms;
        self
    }

    pub fn with_http_params(mut self, params: HttpParams) -> Self {
        self.config.http = params;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.http.timeout = timeout;
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.config.endpoints = endpoints;
        self
    }

    pub fn with_max_call_attempts(mut self, attempts: usize) -> Self {
        self.config.max_call_attempts = attempts.max(1);
        self
    }

    pub fn with_max_challenge_attempts(mut self, attempts: usize) -> Self {
        self.config.max_challenge_attempts = attempts.max(1);
        self
    }

    /// Arguments sent with every method call unless the call sets them itself.
    pub fn with_default_args(mut self, args: CallArgs) -> Self {
        self.default_args = args;
        self
    }

    /// Use a custom transport instead of the reqwest one.
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Override the resolver picked from the interactive flag.
    pub fn with_resolver(mut self, resolver: Arc<dyn ChallengeResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Do not register the logging event handler.
    pub fn disable_event_logging(mut self) -> Self {
        self.log_events = false;
        self
    }

    /// Validate the configuration and assemble the session.
    ///
    /// No request is made; the credential is acquired on the first call.
    pub fn build(self) -> VkResult<Session> {
        self.config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(self.config.http.clone())?),
        };
        let resolver = self
            .resolver
            .unwrap_or_else(|| default_resolver(self.config.interactive));

        let mut events = if self.log_events {
            EventDispatcher::with_logging()
        } else {
            EventDispatcher::new()
        };
        for handler in self.handlers {
            events.register_handler(handler);
        }

        let auth = AuthEngine::new(
            &self.config,
            transport.clone(),
            resolver.clone(),
            events.clone(),
        );

        Ok(Session {
            inner: Arc::new(SessionInner {
                config: self.config,
                transport,
                resolver,
                events,
                auth,
                default_args: self.default_args,
            }),
        })
    }

    /// Like [`SessionBuilder::build`], then acquire the credential right
    /// away when the session logs in.
    pub async fn connect(self) -> VkResult<Session> {
        let session = self.build()?;
        if session.auth().can_renew() {
            session.auth().credential().await?;
        }
        Ok(session)
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct SessionInner {
    config: SessionConfig,
    transport: Arc<dyn HttpTransport>,
    resolver: Arc<dyn ChallengeResolver>,
    events: EventDispatcher,
    auth: AuthEngine,
    default_args: CallArgs,
}

/// Cheap-to-clone handle on one authenticated (or anonymous) API session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Lazy session for `config`.
    pub fn new(config: SessionConfig) -> VkResult<Self> {
        SessionBuilder::new().with_config(config).build()
    }

    /// Session for `config`, logged in before returning.
    pub async fn connect(config: SessionConfig) -> VkResult<Self> {
        SessionBuilder::new().with_config(config).connect().await
    }

    pub fn api(&self) -> Api {
        Api::new(self.clone())
    }

    pub fn api_version(&self) -> &str {
        &self.inner.config.api_version
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn auth(&self) -> &AuthEngine {
        &self.inner.auth
    }

    /// Arguments merged under every call's own arguments.
    pub fn default_args(&self) -> &CallArgs {
        &self.inner.default_args
    }

    pub fn transport(&self) -> Arc<dyn HttpTransport> {
        self.inner.transport.clone()
    }

    /// Current token, acquiring one if needed. `None` for anonymous sessions.
    pub async fn access_token(&self) -> VkResult<Option<String>> {
        let credential = self.inner.auth.credential().await?;
        Ok(credential.map(|credential| credential.token().to_string()))
    }

    /// Log in again and replace the cached credential.
    pub async fn renew_access_token(&self) -> VkResult<Credential> {
        self.inner.auth.renew().await
    }

    /// Run `call`, retrying after captcha answers and credential renewal.
    ///
    /// Every retry re-sends the same method and arguments; only the captcha
    /// answer and the token change.
    pub async fn make_request(&self, call: &MethodCall) -> VkResult<Value> {
        let inner = &self.inner;
        let method = call.method_name();
        let url = method_url(&inner.config.endpoints.api_url, &method)?;

        let args = match call.args() {
            Some(args) => args.with_defaults(&inner.default_args),
            None => inner.default_args.clone(),
        };
        let mut fields = to_form_fields(&args);
        let version = match fields.iter().position(|(key, _)| key == "v") {
            Some(index) => fields.remove(index).1,
            None => inner.config.api_version.clone(),
        };

        let max_attempts = inner.config.max_call_attempts.max(1);
        let mut captcha: Option<(String, String)> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let credential = inner.auth.credential().await?;

            let mut payload = Vec::with_capacity(fields.len() + 4);
            payload.push(("v".to_string(), version.clone()));
            payload.extend(fields.iter().cloned());
            if let Some(credential) = &credential {
                payload.push(("access_token".into(), credential.token().into()));
            }
            if let Some((sid, key)) = &captcha {
                payload.push(("captcha_sid".into(), sid.clone()));
                payload.push(("captcha_key".into(), key.clone()));
            }

            log::debug!("calling {method} (attempt {attempt})");
            let request =
                TransportRequest::post_form(url.clone(), payload).with_timeout(call.timeout());
            let response = inner.transport.send(request).await?;
            let body = response.text();

            let error = match interpret_body(&body)? {
                ResponseOutcome::Result(value) => return Ok(value),
                ResponseOutcome::ExecuteError(error) => return Err(error.into()),
                ResponseOutcome::Unrecognized => {
                    let excerpt: String = body.chars().take(BODY_EXCERPT).collect();
                    return Err(VkError::UnexpectedResponse(excerpt));
                }
                ResponseOutcome::Error(error) => error,
            };

            if attempt >= max_attempts {
                inner
                    .events
                    .dispatch(SessionEvent::error(&method, error.to_string()));
                return Err(error.into());
            }

            if error.is_captcha_needed() {
                let task = CaptchaTask::new(
                    error.captcha_sid.clone().unwrap_or_default(),
                    error.captcha_img.clone().unwrap_or_default(),
                );
                log::info!("captcha needed for {method}, sid={}", task.sid);
                let answer = inner.resolver.resolve_captcha(&task).await;
                inner.events.dispatch(SessionEvent::challenge(
                    "captcha",
                    inner.resolver.name(),
                    matches!(&answer, Ok(key) if !key.is_empty()),
                ));
                match answer {
                    Ok(key) if !key.is_empty() => captcha = Some((task.sid, key)),
                    Ok(_) | Err(ResolverError::Declined(_)) => return Err(error.into()),
                    Err(err) => return Err(err.into()),
                }
                inner
                    .events
                    .dispatch(SessionEvent::retry(&method, attempt + 1, "captcha needed"));
                continue;
            }

            if error.is_access_token_incorrect() && inner.auth.can_renew() {
                log::info!("access token rejected for {method}: {}", error.message);
                if let Some(stale) = &credential {
                    inner.auth.invalidate(stale).await;
                }
                captcha = None;
                inner.events.dispatch(SessionEvent::retry(
                    &method,
                    attempt + 1,
                    "access token rejected",
                ));
                continue;
            }

            return Err(error.into());
        }
    }
}

/// `api_url` with `method` appended as a single path segment.
///
/// The method name never changes the host or the rest of the path.
fn method_url(api_url: &Url, method: &str) -> VkResult<Url> {
    let mut url = api_url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| VkError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
        .pop_if_empty()
        .push(method);
    Ok(url)
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.inner.config)
            .field("mode", &self.inner.auth.mode())
            .field("state", &self.inner.auth.state())
            .field("resolver", &self.inner.resolver.name())
            .finish()
    }
}
