//! Session configuration.
//!
//! Provides unified configuration with:
//! - Plain struct with sensible defaults (see [`SessionConfig::default`])
//! - JSON loading
//! - Environment loading (`VK_*` variables)
//! - Endpoint overrides, mostly useful against a local mock server

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use url::Url;

/// Protocol version sent with every call unless overridden per call via `v`.
pub const DEFAULT_API_VERSION: &str = "5.45";

/// Permission scope requested during the OAuth grant.
pub const DEFAULT_SCOPE: &str = "offline";

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_CALL_ATTEMPTS: usize = 5;
const DEFAULT_MAX_CHALLENGE_ATTEMPTS: usize = 5;

static DEFAULT_ENDPOINTS: Lazy<Endpoints> = Lazy::new(|| {
    let parse = |raw: &str| Url::parse(raw).expect("invalid default endpoint");
    Endpoints {
        api_url: parse("https://api.vk.com/method/"),
        login_url: parse("https://m.vk.com"),
        authorize_url: parse("https://oauth.vk.com/authorize"),
        token_url: parse("https://oauth.vk.com/token"),
        captcha_url: parse("https://m.vk.com/captcha.php"),
    }
});

/// Configuration failures, raised at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("app_id={app_id:?}, login={login:?} and password (set: {password}) must all be given")]
    MissingIdentity {
        app_id: Option<String>,
        login: Option<String>,
        password: bool,
    },
    #[error("invalid configuration json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Remote endpoints used by the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// Base for method calls; the method name is joined onto it.
    pub api_url: Url,
    /// Mobile login page holding the credentials form.
    pub login_url: Url,
    /// OAuth implicit-grant endpoint.
    pub authorize_url: Url,
    /// Direct password-grant endpoint.
    pub token_url: Url,
    /// Captcha image endpoint used to build image URLs from `s`/`sid`.
    pub captcha_url: Url,
}

impl Default for Endpoints {
    fn default() -> Self {
        DEFAULT_ENDPOINTS.clone()
    }
}

/// HTTP parameters merged into every transport call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpParams {
    #[serde(rename = "timeout_secs", with = "duration_secs")]
    pub timeout: Duration,
    pub verify_tls: bool,
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl Default for HttpParams {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            verify_tls: true,
            user_agent: None,
            proxy: None,
            headers: BTreeMap::new(),
        }
    }
}

/// Requested permissions, either a single raw string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scope {
    Single(String),
    List(Vec<String>),
}

impl Scope {
    /// Wire representation (`a,b,c`).
    pub fn to_param(&self) -> String {
        match self {
            Scope::Single(value) => value.clone(),
            Scope::List(values) => values.join(","),
        }
    }

    fn parse(raw: &str) -> Self {
        if raw.contains(',') {
            Scope::List(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            )
        } else {
            Scope::Single(raw.trim().to_string())
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Scope::Single(DEFAULT_SCOPE.into())
    }
}

impl From<&str> for Scope {
    fn from(value: &str) -> Self {
        Scope::Single(value.into())
    }
}

impl From<String> for Scope {
    fn from(value: String) -> Self {
        Scope::Single(value)
    }
}

impl<S: Into<String>> From<Vec<S>> for Scope {
    fn from(values: Vec<S>) -> Self {
        Scope::List(values.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_param())
    }
}

/// Everything needed to construct a [`crate::Session`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(deserialize_with = "string_or_number")]
    pub app_id: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
    /// Full phone number, used to answer "confirm the missing digits" checks.
    pub phone_number: Option<String>,
    pub scope: Scope,
    pub api_version: String,
    /// Prompt on the console for captcha / 2FA / phone digits.
    pub interactive: bool,
    /// Pre-issued credential; bypasses the login flow entirely.
    pub service_token: Option<String>,
    /// Application secret; switches login to the direct password grant.
    pub client_secret: Option<String>,
    pub two_factor_supported: bool,
    pub force_sms: bool,
    pub http: HttpParams,
    pub endpoints: Endpoints,
    /// Upper bound on dispatch attempts of one call (captcha / token retries).
    pub max_call_attempts: usize,
    /// Upper bound on challenges answered during one login.
    pub max_challenge_attempts: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            login: None,
            password: None,
            phone_number: None,
            scope: Scope::default(),
            api_version: DEFAULT_API_VERSION.into(),
            interactive: false,
            service_token: None,
            client_secret: None,
            two_factor_supported: false,
            force_sms: false,
            http: HttpParams::default(),
            endpoints: Endpoints::default(),
            max_call_attempts: DEFAULT_MAX_CALL_ATTEMPTS,
            max_challenge_attempts: DEFAULT_MAX_CHALLENGE_ATTEMPTS,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("app_id", &self.app_id)
            .field("login", &self.login)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("phone_number", &self.phone_number)
            .field("scope", &self.scope)
            .field("api_version", &self.api_version)
            .field("interactive", &self.interactive)
            .field("service_token", &self.service_token.as_ref().map(|_| "***"))
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("two_factor_supported", &self.two_factor_supported)
            .field("force_sms", &self.force_sms)
            .field("http", &self.http)
            .field("endpoints", &self.endpoints)
            .field("max_call_attempts", &self.max_call_attempts)
            .field("max_challenge_attempts", &self.max_challenge_attempts)
            .finish()
    }
}

impl SessionConfig {
    /// Parse a JSON document; missing fields fall back to defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Read `VK_APP_ID`, `VK_USER_LOGIN`, `VK_USER_PASSWORD`,
    /// `VK_PHONE_NUMBER`, `VK_SERVICE_TOKEN`, `VK_API_VERSION` and `VK_SCOPE`
    /// from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SessionConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let mut config = Self {
            app_id: get("VK_APP_ID"),
            login: get("VK_USER_LOGIN"),
            password: get("VK_USER_PASSWORD"),
            phone_number: get("VK_PHONE_NUMBER"),
            service_token: get("VK_SERVICE_TOKEN"),
            ..Self::default()
        };

        if let Some(version) = get("VK_API_VERSION") {
            if !version.chars().all(|c| c.is_ascii_digit() || c == '.') {
                return Err(ConfigError::InvalidValue {
                    key: "VK_API_VERSION",
                    value: version,
                });
            }
            config.api_version = version;
        }

        if let Some(scope) = get("VK_SCOPE") {
            config.scope = Scope::parse(&scope);
        }

        Ok(config)
    }

    /// A credential must be derived when any part of a login identity is set.
    pub fn is_token_required(&self) -> bool {
        self.app_id.is_some() || self.login.is_some() || self.password.is_some()
    }

    /// Fail early when a credential must be derived but the identity is
    /// incomplete. A service token needs no identity at all.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_token.is_some() || !self.is_token_required() {
            return Ok(());
        }

        if self.app_id.is_none() || self.login.is_none() || self.password.is_none() {
            return Err(ConfigError::MissingIdentity {
                app_id: self.app_id.clone(),
                login: self.login.clone(),
                password: self.password.is_some(),
            });
        }

        Ok(())
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    }))
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("timeout must be a non-negative number"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
