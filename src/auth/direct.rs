//! Direct password grant, available to applications holding a client secret.

use serde::Deserialize;

use super::{AuthError, Credential, FlowContext};
use crate::error::VkResult;
use crate::resolvers::{CaptchaTask, TwoFactorTask};
use crate::transport::{TransportError, TransportRequest};

#[derive(Debug, Default, Deserialize)]
struct GrantReply {
    access_token: Option<String>,
    expires_in: Option<i64>,
    user_id: Option<serde_json::Value>,
    error: Option<String>,
    error_description: Option<String>,
    captcha_sid: Option<String>,
    captcha_img: Option<String>,
    validation_type: Option<String>,
    phone_mask: Option<String>,
    redirect_uri: Option<String>,
}

/// Exchange login and password for a token at the token endpoint, answering
/// captcha and validation requests on the way.
pub(super) async fn password_grant(ctx: &FlowContext<'_>) -> VkResult<Credential> {
    let identity = ctx.identity;
    let flag = |value: bool| if value { "1" } else { "0" };
    let scope = identity.scope.to_param();

    let base: Vec<(String, String)> = [
        ("grant_type", "password"),
        ("client_id", identity.app_id()),
        ("client_secret", identity.client_secret.as_deref().unwrap_or_default()),
        ("username", identity.login()),
        ("password", identity.password()),
        ("scope", scope.as_str()),
        ("v", identity.api_version.as_str()),
        ("2fa_supported", flag(identity.two_factor_supported)),
        ("force_sms", flag(identity.force_sms)),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value.to_string()))
    .collect();

    let mut extra: Vec<(String, String)> = Vec::new();
    let mut answered = 0;

    loop {
        let mut fields = base.clone();
        fields.extend(extra.iter().cloned());
        let request = TransportRequest::post_form(ctx.endpoints.token_url.clone(), fields);

        let body = match ctx.transport.send(request).await {
            Ok(response) => response.text(),
            // Grant errors come back with 4xx statuses and a JSON body.
            Err(TransportError::Status { status, body, .. }) if (400..500).contains(&status) => body,
            Err(err) => return Err(err.into()),
        };
        let reply: GrantReply = serde_json::from_str(&body)?;

        if let Some(token) = reply.access_token.filter(|token| !token.is_empty()) {
            let mut credential = Credential::new(token);
            if let Some(expires_in) = reply.expires_in {
                log::info!("access token received, expires_in={expires_in}");
                credential = credential.with_expires_in(expires_in);
            }
            if let Some(user_id) = reply.user_id {
                credential = credential.with_user_id(match user_id {
                    serde_json::Value::String(text) => text,
                    other => other.to_string(),
                });
            }
            return Ok(credential);
        }

        let error = reply.error.unwrap_or_default();
        let description = reply.error_description.unwrap_or_default();

        answered += 1;
        if answered > ctx.max_challenge_attempts
            && matches!(error.as_str(), "need_captcha" | "need_validation")
        {
            return Err(AuthError::TooManyChallenges(ctx.max_challenge_attempts).into());
        }

        extra = match error.as_str() {
            "need_captcha" => {
                let sid = reply.captcha_sid.unwrap_or_default();
                let task = CaptchaTask::new(sid.clone(), reply.captcha_img.unwrap_or_default());
                let key = ctx.solve_captcha(&task).await?;
                vec![("captcha_sid".into(), sid), ("captcha_key".into(), key)]
            }
            "need_validation" => {
                let mut task = TwoFactorTask::default()
                    .with_validation(reply.validation_type, reply.phone_mask);
                if let Some(uri) = reply.redirect_uri {
                    task = task.with_submit_url(uri);
                }
                let code = ctx.solve_two_factor(&task).await?;
                vec![("code".into(), code)]
            }
            "" => return Err(AuthError::MissingToken(body).into()),
            _ => {
                return Err(AuthError::GrantRejected(format!("[{error}] {description}")).into());
            }
        };
    }
}
