use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::{
    CaptchaTask, ChallengeResolver, PhoneTask, ResolverError, ResolverResult, TwoFactorTask,
};

type Callback<T> = Arc<dyn Fn(&T) -> ResolverResult + Send + Sync>;

/// Resolver assembled from plain closures.
///
/// Challenges without a registered closure fail with
/// [`ResolverError::ManualInputRequired`].
#[derive(Clone, Default)]
pub struct CallbackResolver {
    captcha: Option<Callback<CaptchaTask>>,
    two_factor: Option<Callback<TwoFactorTask>>,
    phone: Option<Callback<PhoneTask>>,
}

impl CallbackResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_captcha<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CaptchaTask) -> ResolverResult + Send + Sync + 'static,
    {
        self.captcha = Some(Arc::new(callback));
        self
    }

    pub fn on_two_factor<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TwoFactorTask) -> ResolverResult + Send + Sync + 'static,
    {
        self.two_factor = Some(Arc::new(callback));
        self
    }

    pub fn on_phone<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PhoneTask) -> ResolverResult + Send + Sync + 'static,
    {
        self.phone = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for CallbackResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackResolver")
            .field("captcha", &self.captcha.is_some())
            .field("two_factor", &self.two_factor.is_some())
            .field("phone", &self.phone.is_some())
            .finish()
    }
}

#[async_trait]
impl ChallengeResolver for CallbackResolver {
    fn name(&self) -> &'static str {
        "callback"
    }

    async fn resolve_captcha(&self, task: &CaptchaTask) -> ResolverResult {
        match &self.captcha {
            Some(callback) => callback(task),
            None => Err(ResolverError::ManualInputRequired("captcha")),
        }
    }

    async fn resolve_2fa_code(&self, task: &TwoFactorTask) -> ResolverResult {
        match &self.two_factor {
            Some(callback) => callback(task),
            None => Err(ResolverError::ManualInputRequired("two-factor")),
        }
    }

    async fn resolve_phone_digits(&self, task: &PhoneTask) -> ResolverResult {
        match &self.phone {
            Some(callback) => callback(task),
            None => Err(ResolverError::ManualInputRequired("phone confirmation")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_closures_answer() {
        let resolver = CallbackResolver::new()
            .on_captcha(|task| Ok(format!("answer-{}", task.sid)))
            .on_phone(|task| Ok(format!("{}|{}", task.prefix, task.suffix)));

        let captcha = resolver
            .resolve_captcha(&CaptchaTask::new("42", "https://img"))
            .await
            .unwrap();
        assert_eq!(captcha, "answer-42");

        let phone = resolver
            .resolve_phone_digits(&PhoneTask {
                prefix: "+7".into(),
                suffix: "00".into(),
            })
            .await
            .unwrap();
        assert_eq!(phone, "+7|00");

        let missing = resolver
            .resolve_2fa_code(&TwoFactorTask::default())
            .await
            .unwrap_err();
        assert!(matches!(missing, ResolverError::ManualInputRequired("two-factor")));
    }
}
