//! Credential acquisition and lifecycle.
//!
//! The engine owns the session credential. Depending on the configured
//! identity it runs the browser-style login (form login followed by the OAuth
//! implicit grant), the direct password grant, hands out a pre-issued service
//! token, or works anonymously.
//!
//! The credential slot sits behind an async mutex that is held for the whole
//! acquisition, so concurrent callers never start two logins for one session.

mod direct;
mod login;

use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

use crate::config::{Endpoints, Scope, SessionConfig};
use crate::error::VkResult;
use crate::events::{CredentialChange, EventDispatcher, SessionEvent};
use crate::parsers::parse_url_query_params;
use crate::resolvers::{CaptchaTask, ChallengeResolver, ResolverError, TwoFactorTask};
use crate::transport::HttpTransport;

/// Failures of the credential flows.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authorization error: incorrect password or authentication code")]
    IncorrectCredentials,
    #[error("VK error: {0}")]
    GrantRejected(String),
    #[error("no access token in grant response ({0})")]
    MissingToken(String),
    #[error("phone number is required to confirm {prefix}...{suffix}")]
    PhoneRequired { prefix: String, suffix: String },
    #[error("configured phone number does not match {prefix}...{suffix}")]
    PhoneMismatch { prefix: String, suffix: String },
    #[error("security check form has no hash")]
    MissingHash,
    #[error("gave up after {0} login challenges")]
    TooManyChallenges(usize),
    #[error("credential of this session cannot be renewed")]
    NotRenewable,
}

/// Bearer credential attached to API calls.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: Option<DateTime<Utc>>,
    user_id: Option<String>,
}

impl Credential {
    /// Non-expiring credential, as for service tokens.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
            user_id: None,
        }
    }

    /// `expires_in` is in seconds; `0` means the token never expires.
    pub fn with_expires_in(mut self, expires_in: i64) -> Self {
        self.expires_at = (expires_in > 0).then(|| Utc::now() + ChronoDuration::seconds(expires_in));
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Read `access_token`, `expires_in` and `user_id` from grant parameters.
    pub fn from_grant_params(params: &[(String, String)]) -> Option<Self> {
        let get = |key: &str| {
            params
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.as_str())
        };

        let token = get("access_token").filter(|token| !token.is_empty())?;
        let mut credential = Credential::new(token);
        if let Some(expires_in) = get("expires_in").and_then(|raw| raw.parse::<i64>().ok()) {
            credential = credential.with_expires_in(expires_in);
        }
        if let Some(user_id) = get("user_id") {
            credential = credential.with_user_id(user_id);
        }
        Some(credential)
    }

    /// Credential carried in the fragment of a grant redirect.
    pub fn from_redirect(url: &Url) -> Option<Self> {
        Self::from_grant_params(&parse_url_query_params(url.as_str(), true))
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }

    /// First and last four characters, the rest hidden.
    pub fn censored(&self) -> String {
        let chars: Vec<char> = self.token.chars().collect();
        if chars.len() >= 12 {
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{head}***{tail}")
        } else {
            "***".into()
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &self.censored())
            .field("expires_at", &self.expires_at)
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.censored())
    }
}

/// Who the session acts as.
#[derive(Clone)]
pub struct Identity {
    pub app_id: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
    pub phone_number: Option<String>,
    pub scope: Scope,
    pub api_version: String,
    pub client_secret: Option<String>,
    pub two_factor_supported: bool,
    pub force_sms: bool,
}

impl Identity {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            app_id: config.app_id.clone(),
            login: config.login.clone(),
            password: config.password.clone(),
            phone_number: config.phone_number.clone(),
            scope: config.scope.clone(),
            api_version: config.api_version.clone(),
            client_secret: config.client_secret.clone(),
            two_factor_supported: config.two_factor_supported,
            force_sms: config.force_sms,
        }
    }

    pub(crate) fn app_id(&self) -> &str {
        self.app_id.as_deref().unwrap_or_default()
    }

    pub(crate) fn login(&self) -> &str {
        self.login.as_deref().unwrap_or_default()
    }

    pub(crate) fn password(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("app_id", &self.app_id)
            .field("login", &self.login)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("phone_number", &self.phone_number)
            .field("scope", &self.scope)
            .field("api_version", &self.api_version)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("two_factor_supported", &self.two_factor_supported)
            .field("force_sms", &self.force_sms)
            .finish()
    }
}

/// How the session obtains its credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialMode {
    /// No credential at all.
    Anonymous,
    /// Pre-issued token, never renewed.
    Service,
    /// Form login followed by the implicit OAuth grant.
    BrowserLogin,
    /// Password grant with the application secret.
    DirectGrant,
}

impl CredentialMode {
    pub fn from_config(config: &SessionConfig) -> Self {
        if config.service_token.is_some() {
            CredentialMode::Service
        } else if !config.is_token_required() {
            CredentialMode::Anonymous
        } else if config.client_secret.is_some() {
            CredentialMode::DirectGrant
        } else {
            CredentialMode::BrowserLogin
        }
    }

    pub fn can_renew(self) -> bool {
        matches!(self, CredentialMode::BrowserLogin | CredentialMode::DirectGrant)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    NoCredential,
    Acquiring,
    HaveCredential,
    /// The last acquisition failed. The next request starts over.
    LoginFailed,
}

/// Everything the login flows need for one acquisition.
pub(crate) struct FlowContext<'a> {
    pub identity: &'a Identity,
    pub endpoints: &'a Endpoints,
    pub transport: Arc<dyn HttpTransport>,
    pub resolver: &'a dyn ChallengeResolver,
    pub events: &'a EventDispatcher,
    pub max_challenge_attempts: usize,
}

impl FlowContext<'_> {
    pub(crate) async fn solve_captcha(&self, task: &CaptchaTask) -> Result<String, ResolverError> {
        log::info!("captcha needed, sid={}", task.sid);
        let answer = self.resolver.resolve_captcha(task).await;
        self.report("captcha", answer.is_ok());
        answer
    }

    pub(crate) async fn solve_two_factor(&self, task: &TwoFactorTask) -> Result<String, ResolverError> {
        log::info!("two-factor authentication code required");
        let answer = self.resolver.resolve_2fa_code(task).await;
        self.report("two_factor", answer.is_ok());
        answer
    }

    pub(crate) fn report(&self, challenge: &'static str, success: bool) {
        self.events
            .dispatch(SessionEvent::challenge(challenge, self.resolver.name(), success));
    }
}

/// Owns the session credential and its acquisition.
pub struct AuthEngine {
    mode: CredentialMode,
    identity: Identity,
    endpoints: Endpoints,
    transport: Arc<dyn HttpTransport>,
    resolver: Arc<dyn ChallengeResolver>,
    events: EventDispatcher,
    max_challenge_attempts: usize,
    slot: Mutex<Option<Credential>>,
    state: StdMutex<AuthState>,
}

impl AuthEngine {
    pub fn new(
        config: &SessionConfig,
        transport: Arc<dyn HttpTransport>,
        resolver: Arc<dyn ChallengeResolver>,
        events: EventDispatcher,
    ) -> Self {
        let mode = CredentialMode::from_config(config);
        let service = config.service_token.clone().map(Credential::new);
        let state = if service.is_some() {
            AuthState::HaveCredential
        } else {
            AuthState::NoCredential
        };

        Self {
            mode,
            identity: Identity::from_config(config),
            endpoints: config.endpoints.clone(),
            transport,
            resolver,
            events,
            max_challenge_attempts: config.max_challenge_attempts.max(1),
            slot: Mutex::new(service),
            state: StdMutex::new(state),
        }
    }

    pub fn mode(&self) -> CredentialMode {
        self.mode
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn is_token_required(&self) -> bool {
        self.mode != CredentialMode::Anonymous
    }

    pub fn can_renew(&self) -> bool {
        self.mode.can_renew()
    }

    pub fn state(&self) -> AuthState {
        *self.state.lock().expect("auth state lock poisoned")
    }

    fn set_state(&self, state: AuthState) {
        *self.state.lock().expect("auth state lock poisoned") = state;
    }

    /// Current credential without triggering acquisition.
    pub async fn cached(&self) -> Option<Credential> {
        self.slot.lock().await.clone()
    }

    /// Credential for the next call, acquiring one when none is usable.
    ///
    /// Anonymous sessions get `None`.
    pub async fn credential(&self) -> VkResult<Option<Credential>> {
        if self.mode == CredentialMode::Anonymous {
            return Ok(None);
        }

        let mut slot = self.slot.lock().await;
        if let Some(credential) = slot.as_ref() {
            if !credential.is_expired() || !self.can_renew() {
                return Ok(Some(credential.clone()));
            }
            log::info!("access token {} expired", credential.censored());
        }

        let credential = self.acquire(&mut slot).await?;
        Ok(Some(credential))
    }

    /// Force a new acquisition, replacing the cached credential.
    pub async fn renew(&self) -> VkResult<Credential> {
        if !self.can_renew() {
            return Err(AuthError::NotRenewable.into());
        }
        let mut slot = self.slot.lock().await;
        self.acquire(&mut slot).await
    }

    /// Drop the cached credential if it is still `stale`.
    ///
    /// Returns `false` when another caller already replaced it.
    pub async fn invalidate(&self, stale: &Credential) -> bool {
        let mut slot = self.slot.lock().await;
        if slot.as_ref() != Some(stale) {
            return false;
        }
        *slot = None;
        self.set_state(AuthState::NoCredential);
        self.events.dispatch(SessionEvent::credential(
            CredentialChange::Invalidated,
            stale.censored(),
        ));
        true
    }

    /// Install a credential obtained elsewhere.
    pub async fn set_credential(&self, credential: Credential) {
        let mut slot = self.slot.lock().await;
        self.events.dispatch(SessionEvent::credential(
            CredentialChange::Acquired,
            credential.censored(),
        ));
        *slot = Some(credential);
        self.set_state(AuthState::HaveCredential);
    }

    async fn acquire(&self, slot: &mut Option<Credential>) -> VkResult<Credential> {
        self.set_state(AuthState::Acquiring);

        let result = self.run_flow().await;
        match result {
            Ok(credential) => {
                log::info!("access token {} acquired", credential.censored());
                self.events.dispatch(SessionEvent::credential(
                    CredentialChange::Acquired,
                    credential.censored(),
                ));
                *slot = Some(credential.clone());
                self.set_state(AuthState::HaveCredential);
                Ok(credential)
            }
            Err(err) => {
                log::warn!("credential acquisition failed: {err}");
                *slot = None;
                self.set_state(AuthState::LoginFailed);
                Err(err)
            }
        }
    }

    async fn run_flow(&self) -> VkResult<Credential> {
        let ctx = FlowContext {
            identity: &self.identity,
            endpoints: &self.endpoints,
            transport: self.transport.fresh_session()?,
            resolver: self.resolver.as_ref(),
            events: &self.events,
            max_challenge_attempts: self.max_challenge_attempts,
        };

        match self.mode {
            CredentialMode::BrowserLogin => login::browser_login(&ctx).await,
            CredentialMode::DirectGrant => direct::password_grant(&ctx).await,
            CredentialMode::Anonymous | CredentialMode::Service => {
                Err(AuthError::NotRenewable.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolvers::NonInteractiveResolver;
    use crate::transport::stub::StubTransport;

    fn engine(config: &SessionConfig, stub: Arc<StubTransport>) -> AuthEngine {
        AuthEngine::new(
            config,
            stub,
            Arc::new(NonInteractiveResolver),
            EventDispatcher::new(),
        )
    }

    #[test]
    fn censored_form_hides_the_middle() {
        assert_eq!(Credential::new("my_fake_token").censored(), "my_f***oken");
        assert_eq!(Credential::new("short").censored(), "***");
        let debug = format!("{:?}", Credential::new("0123456789abcdef"));
        assert!(debug.contains("0123***cdef"));
        assert!(!debug.contains("456789ab"));
    }

    #[test]
    fn grant_params_build_credential() {
        let url = Url::parse("https://oauth.vk.com/blank.html#access_token=tok&expires_in=0&user_id=9")
            .unwrap();
        let credential = Credential::from_redirect(&url).unwrap();
        assert_eq!(credential.token(), "tok");
        assert_eq!(credential.user_id(), Some("9"));
        assert!(credential.expires_at().is_none());
        assert!(!credential.is_expired());

        let expiring = Credential::new("t").with_expires_in(3600);
        assert!(expiring.expires_at().is_some());
        assert!(!expiring.is_expired());

        assert!(Credential::from_redirect(&Url::parse("https://oauth.vk.com/blank.html").unwrap()).is_none());
    }

    #[test]
    fn mode_follows_identity() {
        let mut config = SessionConfig::default();
        assert_eq!(CredentialMode::from_config(&config), CredentialMode::Anonymous);
        config.app_id = Some("1".into());
        config.login = Some("l".into());
        config.password = Some("p".into());
        assert_eq!(CredentialMode::from_config(&config), CredentialMode::BrowserLogin);
        config.client_secret = Some("s".into());
        assert_eq!(CredentialMode::from_config(&config), CredentialMode::DirectGrant);
        config.service_token = Some("svc".into());
        assert_eq!(CredentialMode::from_config(&config), CredentialMode::Service);
        assert!(!CredentialMode::Service.can_renew());
    }

    #[tokio::test]
    async fn service_token_is_handed_out_without_requests() {
        let stub = StubTransport::new();
        let config = SessionConfig {
            service_token: Some("service-token-value".into()),
            ..SessionConfig::default()
        };
        let engine = engine(&config, stub.clone());
        assert_eq!(engine.state(), AuthState::HaveCredential);
        let credential = engine.credential().await.unwrap().unwrap();
        assert_eq!(credential.token(), "service-token-value");
        assert!(stub.requests().is_empty());
        assert!(matches!(
            engine.renew().await,
            Err(crate::VkError::Auth(AuthError::NotRenewable))
        ));
    }

    #[tokio::test]
    async fn anonymous_sessions_have_no_credential() {
        let stub = StubTransport::new();
        let engine = engine(&SessionConfig::default(), stub);
        assert!(!engine.is_token_required());
        assert!(engine.credential().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalidate_only_drops_matching_credential() {
        let stub = StubTransport::new();
        let config = SessionConfig {
            service_token: Some("aaaaaaaaaaaaaaaa".into()),
            ..SessionConfig::default()
        };
        let engine = engine(&config, stub);
        assert!(!engine.invalidate(&Credential::new("other")).await);
        assert!(engine.cached().await.is_some());

        engine.set_credential(Credential::new("bbbbbbbbbbbbbbbb")).await;
        assert!(!engine.invalidate(&Credential::new("aaaaaaaaaaaaaaaa")).await);
        assert!(engine.invalidate(&Credential::new("bbbbbbbbbbbbbbbb")).await);
        assert_eq!(engine.state(), AuthState::NoCredential);
        assert!(engine.cached().await.is_none());
    }
}
