//! Challenge resolvers.
//!
//! A resolver answers the questions the remote side asks during login or in
//! the middle of an API call: captcha text, two-factor codes and the missing
//! digits of a phone number. The session never prompts by itself; it asks the
//! configured [`ChallengeResolver`].

mod callback;
mod console;

pub use callback::CallbackResolver;
pub use console::ConsoleResolver;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Captcha presented by the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaTask {
    pub sid: String,
    pub image_url: String,
}

impl CaptchaTask {
    pub fn new(sid: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            image_url: image_url.into(),
        }
    }
}

/// Request for a one-time authentication code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TwoFactorTask {
    /// Where the code is going to be posted.
    pub submit_url: Option<String>,
    /// Delivery channel reported by the server (`2fa_app`, `2fa_sms`, ...).
    pub validation_type: Option<String>,
    /// Masked phone the SMS was sent to.
    pub phone_mask: Option<String>,
}

impl TwoFactorTask {
    pub fn with_submit_url(mut self, url: impl Into<String>) -> Self {
        self.submit_url = Some(url.into());
        self
    }

    pub fn with_validation(
        mut self,
        validation_type: Option<String>,
        phone_mask: Option<String>,
    ) -> Self {
        self.validation_type = validation_type;
        self.phone_mask = phone_mask;
        self
    }
}

/// Masked phone number whose hidden middle must be supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneTask {
    pub prefix: String,
    pub suffix: String,
}

/// Common result type returned by resolvers.
pub type ResolverResult = Result<String, ResolverError>;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("manual input required to answer {0} challenge")]
    ManualInputRequired(&'static str),
    #[error("{0} challenge declined")]
    Declined(&'static str),
    #[error("resolver i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("resolver error: {0}")]
    Other(String),
}

/// Capability set used by the session to answer challenges.
#[async_trait]
pub trait ChallengeResolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Text shown on the captcha image.
    async fn resolve_captcha(&self, task: &CaptchaTask) -> ResolverResult;

    /// One-time authentication code.
    async fn resolve_2fa_code(&self, task: &TwoFactorTask) -> ResolverResult;

    /// Digits hidden between `prefix` and `suffix`.
    async fn resolve_phone_digits(&self, task: &PhoneTask) -> ResolverResult;
}

/// Resolver for unattended sessions: every challenge needs a human.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonInteractiveResolver;

#[async_trait]
impl ChallengeResolver for NonInteractiveResolver {
    fn name(&self) -> &'static str {
        "non-interactive"
    }

    async fn resolve_captcha(&self, _task: &CaptchaTask) -> ResolverResult {
        Err(ResolverError::ManualInputRequired("captcha"))
    }

    async fn resolve_2fa_code(&self, _task: &TwoFactorTask) -> ResolverResult {
        Err(ResolverError::ManualInputRequired("two-factor"))
    }

    async fn resolve_phone_digits(&self, _task: &PhoneTask) -> ResolverResult {
        Err(ResolverError::ManualInputRequired("phone confirmation"))
    }
}

/// Console prompts when `interactive`, refusal otherwise.
pub fn default_resolver(interactive: bool) -> Arc<dyn ChallengeResolver> {
    if interactive {
        Arc::new(ConsoleResolver::new())
    } else {
        Arc::new(NonInteractiveResolver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_interactive_requires_manual_input() {
        let resolver = default_resolver(false);
        assert_eq!(resolver.name(), "non-interactive");
        let err = resolver
            .resolve_captcha(&CaptchaTask::new("1", "https://m.vk.com/captcha.php?sid=1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::ManualInputRequired("captcha")));
    }

    #[test]
    fn interactive_flag_selects_console() {
        assert_eq!(default_resolver(true).name(), "console");
    }
}
