//! Browser-style login: credentials form, challenges, then the implicit grant.

use serde::Deserialize;
use url::Url;

use super::{AuthError, Credential, FlowContext};
use crate::error::VkResult;
use crate::parsers::{
    LoginChallenge, ParseError, check_html_warnings, classify_login_response,
    parse_form_action_url, query_param,
};
use crate::resolvers::{CaptchaTask, PhoneTask, ResolverError, TwoFactorTask};
use crate::transport::{TransportRequest, TransportResponse};

const SESSION_COOKIES: [&str; 2] = ["remixsid", "remixsid6"];

pub(super) async fn browser_login(ctx: &FlowContext<'_>) -> VkResult<Credential> {
    let flow = LoginFlow { ctx };
    flow.submit_credentials().await?;
    flow.authorize_grant().await
}

struct LoginFlow<'a, 'b> {
    ctx: &'a FlowContext<'b>,
}

impl LoginFlow<'_, '_> {
    async fn send(&self, request: TransportRequest) -> VkResult<TransportResponse> {
        Ok(self.ctx.transport.send(request).await?)
    }

    fn credential_fields(&self) -> Vec<(String, String)> {
        vec![
            ("email".into(), self.ctx.identity.login().into()),
            ("pass".into(), self.ctx.identity.password().into()),
        ]
    }

    /// Log in on the mobile site and walk through whatever challenges it
    /// raises until a session cookie is set.
    async fn submit_credentials(&self) -> VkResult<()> {
        let endpoints = self.ctx.endpoints;
        log::info!("logging in as {}", self.ctx.identity.login());

        let page = self
            .send(TransportRequest::get(endpoints.login_url.clone()))
            .await?;
        let action = parse_form_action_url(&page.text())?;
        let action_url = page.url.join(&action)?;

        let mut response = self
            .send(TransportRequest::post_form(
                action_url.clone(),
                self.credential_fields(),
            ))
            .await?;

        let mut answered = 0;
        loop {
            let body = response.text();
            let Some(challenge) =
                classify_login_response(&response.url, &body, &endpoints.captcha_url)?
            else {
                break;
            };

            answered += 1;
            if answered > self.ctx.max_challenge_attempts {
                return Err(AuthError::TooManyChallenges(self.ctx.max_challenge_attempts).into());
            }
            log::debug!("login challenge: {}", challenge.kind());

            response = match challenge {
                LoginChallenge::Captcha {
                    sid,
                    image_url,
                    submit_url,
                } => {
                    let task = CaptchaTask::new(sid.clone(), image_url.as_str());
                    let key = self.ctx.solve_captcha(&task).await?;
                    let target = match submit_url {
                        Some(submit_url) => response.url.join(&submit_url)?,
                        None => action_url.clone(),
                    };
                    let mut fields = self.credential_fields();
                    fields.push(("captcha_sid".into(), sid));
                    fields.push(("captcha_key".into(), key));
                    self.send(TransportRequest::post_form(target, fields)).await?
                }
                LoginChallenge::TwoFactor { submit_url } => {
                    self.submit_two_factor(&submit_url).await?
                }
                LoginChallenge::PhoneConfirmation {
                    prefix,
                    suffix,
                    submit_url,
                } => self.confirm_phone(&body, prefix, suffix, &submit_url).await?,
                LoginChallenge::WarningAck { message } => {
                    return Err(ParseError::PageWarnings(message).into());
                }
            };
        }

        if self.has_session_cookie(&response) {
            log::info!("login successful");
            Ok(())
        } else {
            Err(AuthError::IncorrectCredentials.into())
        }
    }

    fn has_session_cookie(&self, response: &TransportResponse) -> bool {
        let jar = self.ctx.transport.cookies(&self.ctx.endpoints.login_url);
        SESSION_COOKIES.iter().any(|name| {
            response.has_cookie(name) || jar.iter().any(|(cookie, _)| cookie == name)
        })
    }

    async fn submit_two_factor(&self, submit_url: &str) -> VkResult<TransportResponse> {
        let task = TwoFactorTask::default().with_submit_url(submit_url);
        let code = self.ctx.solve_two_factor(&task).await?;
        let target = self.ctx.endpoints.login_url.join(submit_url)?;
        self.send(TransportRequest::post_form(
            target,
            [("code", code.as_str()), ("_ajax", "1"), ("remember", "1")],
        ))
        .await
    }

    /// Answer "enter the missing digits of your phone number".
    async fn confirm_phone(
        &self,
        page: &str,
        prefix: String,
        suffix: String,
        submit_url: &str,
    ) -> VkResult<TransportResponse> {
        check_html_warnings(page)?;

        let code = match self.ctx.identity.phone_number.as_deref() {
            Some(phone) => splice_phone_digits(phone, &prefix, &suffix)?,
            None => {
                let task = PhoneTask {
                    prefix: prefix.clone(),
                    suffix: suffix.clone(),
                };
                let answer = self.ctx.resolver.resolve_phone_digits(&task).await;
                self.ctx.report("phone_confirmation", answer.is_ok());
                match answer {
                    Ok(code) => code,
                    Err(ResolverError::ManualInputRequired(_)) => {
                        return Err(AuthError::PhoneRequired { prefix, suffix }.into());
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };

        let hash = query_param(submit_url, false, "hash").ok_or(AuthError::MissingHash)?;
        let target = self.ctx.endpoints.login_url.join(submit_url)?;
        log::info!("confirming phone number {prefix}...{suffix}");
        self.send(TransportRequest::post_form(
            target,
            [
                ("code", code.as_str()),
                ("act", "security_check"),
                ("hash", hash.as_str()),
            ],
        ))
        .await
    }

    /// Ask the authorize endpoint for a token on behalf of the logged-in user.
    async fn authorize_grant(&self) -> VkResult<Credential> {
        let identity = self.ctx.identity;
        let scope = identity.scope.to_param();
        let request = TransportRequest::post_form(
            self.ctx.endpoints.authorize_url.clone(),
            [
                ("client_id", identity.app_id()),
                ("display", "mobile"),
                ("response_type", "token"),
                ("scope", scope.as_str()),
                ("v", identity.api_version.as_str()),
            ],
        );
        let response = self.send(request).await?;

        if let Some(credential) = Credential::from_redirect(&response.url) {
            log_expiry(&response.url);
            return Ok(credential);
        }

        let body = response.text();
        if let Ok(action) = parse_form_action_url(&body) {
            // Access has not been granted yet; the page asks to confirm it.
            let target = response.url.join(&action)?;
            let confirmed = self.send(TransportRequest::get(target)).await?;
            log_expiry(&confirmed.url);
            return Credential::from_redirect(&confirmed.url)
                .ok_or_else(|| AuthError::MissingToken(confirmed.url.to_string()).into());
        }

        Err(grant_error(&body).into())
    }
}

fn log_expiry(url: &Url) {
    if let Some(expires_in) = query_param(url.as_str(), true, "expires_in") {
        log::info!("access token received, expires_in={expires_in}");
    }
}

#[derive(Deserialize)]
struct GrantErrorBody {
    error: String,
    #[serde(default)]
    error_description: String,
}

fn grant_error(body: &str) -> AuthError {
    match serde_json::from_str::<GrantErrorBody>(body) {
        Ok(err) => AuthError::GrantRejected(format!("[{}] {}", err.error, err.error_description)),
        Err(_) => AuthError::GrantRejected("OAuth2 grant access error".into()),
    }
}

/// Digits of `phone` hidden between `prefix` and `suffix`.
///
/// Whitespace is ignored on both sides.
pub(crate) fn splice_phone_digits(
    phone: &str,
    prefix: &str,
    suffix: &str,
) -> Result<String, AuthError> {
    let strip = |value: &str| value.chars().filter(|c| !c.is_whitespace()).collect::<String>();
    let (phone, head, tail) = (strip(phone), strip(prefix), strip(suffix));

    let mismatch = || AuthError::PhoneMismatch {
        prefix: prefix.to_string(),
        suffix: suffix.to_string(),
    };

    if phone.len() < head.len() + tail.len() || !phone.starts_with(&head) || !phone.ends_with(&tail)
    {
        return Err(mismatch());
    }

    phone
        .get(head.len()..phone.len() - tail.len())
        .map(String::from)
        .ok_or_else(mismatch)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::{Endpoints, SessionConfig};
    use crate::error::VkError;
    use crate::auth::Identity;
    use crate::events::EventDispatcher;
    use crate::resolvers::{CallbackResolver, ChallengeResolver, NonInteractiveResolver};
    use crate::transport::stub::StubTransport;

    const LOGIN_PAGE: &str = r#"<html><body><form method="post" action="https://login.vk.com/?act=login&amp;soft=1">
        <input name="email"><input name="pass" type="password"></form></body></html>"#;

    const PHONE_PAGE: &str = include_str!("../../tests/fixtures/require_phone_num_resp.html");
    const PHONE_WARN_PAGE: &str = include_str!("../../tests/fixtures/require_phone_num_warn_resp.html");

    fn identity(phone: Option<&str>) -> Identity {
        let config = SessionConfig {
            app_id: Some("123".into()),
            login: Some("user@example.com".into()),
            password: Some("secret".into()),
            phone_number: phone.map(String::from),
            ..SessionConfig::default()
        };
        Identity::from_config(&config)
    }

    async fn run(
        identity: &Identity,
        stub: Arc<StubTransport>,
        resolver: &dyn ChallengeResolver,
    ) -> VkResult<Credential> {
        let endpoints = Endpoints::default();
        let events = EventDispatcher::new();
        let ctx = FlowContext {
            identity,
            endpoints: &endpoints,
            transport: stub,
            resolver,
            events: &events,
            max_challenge_attempts: 3,
        };
        browser_login(&ctx).await
    }

    #[test]
    fn phone_digits_are_cut_from_configured_number() {
        assert_eq!(splice_phone_digits("+123456789", "+1234", "89").unwrap(), "567");
        assert_eq!(splice_phone_digits("+1 234 567 89", "+1234", " 89").unwrap(), "567");
        assert!(matches!(
            splice_phone_digits("+79990001122", "+1234", "89"),
            Err(AuthError::PhoneMismatch { .. })
        ));
        assert!(splice_phone_digits("+1289", "+1234", "89").is_err());
    }

    #[tokio::test]
    async fn plain_login_then_grant() {
        let stub = StubTransport::new();
        stub.reply("https://m.vk.com/", LOGIN_PAGE)
            .reply("https://m.vk.com/feed", "<html>feed</html>")
            .reply(
                "https://oauth.vk.com/blank.html#access_token=tok1234567890&expires_in=0&user_id=1",
                "",
            );
        stub.set_cookie("remixsid", "abc");

        let credential = run(&identity(None), stub.clone(), &NonInteractiveResolver)
            .await
            .unwrap();
        assert_eq!(credential.token(), "tok1234567890");

        let requests = stub.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].url.as_str(), "https://login.vk.com/?act=login&soft=1");
        assert_eq!(requests[1].form_value("email"), Some("user@example.com"));
        assert_eq!(requests[1].form_value("pass"), Some("secret"));
        assert_eq!(requests[2].form_value("client_id"), Some("123"));
        assert_eq!(requests[2].form_value("response_type"), Some("token"));
        assert_eq!(requests[2].form_value("scope"), Some("offline"));
        assert_eq!(requests[2].form_value("v"), Some("5.45"));
    }

    #[tokio::test]
    async fn missing_session_cookie_means_wrong_password() {
        let stub = StubTransport::new();
        stub.reply("https://m.vk.com/", LOGIN_PAGE)
            .reply("https://m.vk.com/login?role=fast&to=&s=0&m=1", "<html>wrong</html>");

        let err = run(&identity(None), stub, &NonInteractiveResolver)
            .await
            .unwrap_err();
        assert!(matches!(err, VkError::Auth(AuthError::IncorrectCredentials)));
        assert_eq!(
            err.to_string(),
            "auth error: Authorization error: incorrect password or authentication code"
        );
    }

    #[tokio::test]
    async fn phone_confirmation_posts_spliced_digits() {
        let stub = StubTransport::new();
        stub.reply("https://m.vk.com/", LOGIN_PAGE)
            .reply("https://m.vk.com/login.php?act=security_check&to=", PHONE_PAGE)
            .reply("https://m.vk.com/feed", "<html>feed</html>")
            .reply("https://oauth.vk.com/blank.html#access_token=tok1234567890", "");
        stub.set_cookie("remixsid6", "abc");

        run(&identity(Some("+123456789")), stub.clone(), &NonInteractiveResolver)
            .await
            .unwrap();

        let requests = stub.requests();
        let confirm = &requests[2];
        assert_eq!(
            confirm.url.as_str(),
            "https://m.vk.com/login.php?act=security_check&to=&hash=4b07a4650e9f22038b"
        );
        assert_eq!(confirm.form_value("code"), Some("567"));
        assert_eq!(confirm.form_value("act"), Some("security_check"));
        assert_eq!(confirm.form_value("hash"), Some("4b07a4650e9f22038b"));
    }

    #[tokio::test]
    async fn phone_warning_stops_before_posting_digits() {
        let stub = StubTransport::new();
        stub.reply("https://m.vk.com/", LOGIN_PAGE).reply(
            "https://m.vk.com/login.php?act=security_check&to=",
            PHONE_WARN_PAGE,
        );

        let err = run(&identity(Some("+123456789")), stub.clone(), &NonInteractiveResolver)
            .await
            .unwrap_err();
        assert!(err.is_page_warning());
        assert!(err.to_string().contains(
            "Incorrect numbers. You can repeat the attempt in 3 hours."
        ));
        assert_eq!(stub.requests().len(), 2);
        assert_eq!(stub.pending(), 0);
    }

    #[tokio::test]
    async fn phone_without_number_needs_manual_input() {
        let stub = StubTransport::new();
        stub.reply("https://m.vk.com/", LOGIN_PAGE)
            .reply("https://m.vk.com/login.php?act=security_check&to=", PHONE_PAGE);

        let err = run(&identity(None), stub, &NonInteractiveResolver)
            .await
            .unwrap_err();
        assert!(err.is_manual_input_required());
        assert!(matches!(
            err,
            VkError::Auth(AuthError::PhoneRequired { ref prefix, ref suffix })
                if prefix == "+1234" && suffix == "89"
        ));
    }

    #[tokio::test]
    async fn phone_digits_from_resolver_are_posted() {
        let stub = StubTransport::new();
        stub.reply("https://m.vk.com/", LOGIN_PAGE)
            .reply("https://m.vk.com/login.php?act=security_check&to=", PHONE_PAGE)
            .reply("https://m.vk.com/feed", "<html>feed</html>")
            .reply("https://oauth.vk.com/blank.html#access_token=tok1234567890", "");
        stub.set_cookie("remixsid", "abc");

        let resolver = CallbackResolver::new().on_phone(|task| {
            assert_eq!((task.prefix.as_str(), task.suffix.as_str()), ("+1234", "89"));
            Ok("567".into())
        });
        run(&identity(None), stub.clone(), &resolver).await.unwrap();

        let requests = stub.requests();
        assert_eq!(requests.len(), 4);
        let confirm = &requests[2];
        assert_eq!(
            confirm.url.as_str(),
            "https://m.vk.com/login.php?act=security_check&to=&hash=4b07a4650e9f22038b"
        );
        assert_eq!(confirm.form_value("code"), Some("567"));
        assert_eq!(confirm.form_value("hash"), Some("4b07a4650e9f22038b"));
    }

    #[tokio::test]
    async fn declined_two_factor_code_aborts_login() {
        let stub = StubTransport::new();
        let authcheck_page = r#"<form action="/login?act=authcheck_code&amp;hash=77"></form>"#;
        stub.reply("https://m.vk.com/", LOGIN_PAGE)
            .reply("https://m.vk.com/login?act=authcheck", authcheck_page);

        let resolver =
            CallbackResolver::new().on_two_factor(|_| Err(ResolverError::Declined("two-factor")));
        let err = run(&identity(None), stub.clone(), &resolver).await.unwrap_err();

        assert!(matches!(
            err,
            VkError::Resolver(ResolverError::Declined("two-factor"))
        ));
        assert_eq!(stub.requests().len(), 2);
        assert_eq!(stub.pending(), 0);
    }

    #[tokio::test]
    async fn captcha_and_two_factor_are_answered() {
        let stub = StubTransport::new();
        let captcha_page = r#"<form action="https://login.vk.com/?act=login&amp;soft=1"><input name="captcha_key"></form>"#;
        let authcheck_page = r#"<form action="/login?act=authcheck_code&amp;hash=77"></form>"#;
        stub.reply("https://m.vk.com/", LOGIN_PAGE)
            .reply("https://m.vk.com/login?act=login&s=0&sid=555", captcha_page)
            .reply("https://m.vk.com/login?act=authcheck", authcheck_page)
            .reply("https://m.vk.com/login?act=authcheck_code&hash=77", "{}")
            .reply("https://oauth.vk.com/blank.html#access_token=tok1234567890", "");
        stub.set_cookie("remixsid", "abc");

        let resolver = CallbackResolver::new()
            .on_captcha(|task| {
                assert_eq!(task.image_url, "https://m.vk.com/captcha.php?s=0&sid=555");
                Ok("qwerty".into())
            })
            .on_two_factor(|_| Ok("123456".into()));

        run(&identity(None), stub.clone(), &resolver).await.unwrap();

        let requests = stub.requests();
        assert_eq!(requests[2].form_value("captcha_sid"), Some("555"));
        assert_eq!(requests[2].form_value("captcha_key"), Some("qwerty"));
        assert_eq!(requests[2].form_value("email"), Some("user@example.com"));
        assert_eq!(
            requests[3].url.as_str(),
            "https://m.vk.com/login?act=authcheck_code&hash=77"
        );
        assert_eq!(requests[3].form_value("code"), Some("123456"));
        assert_eq!(requests[3].form_value("remember"), Some("1"));
    }

    #[tokio::test]
    async fn endless_challenges_are_bounded() {
        let stub = StubTransport::new();
        let authcheck_page = r#"<form action="/login?act=authcheck_code"></form>"#;
        stub.reply("https://m.vk.com/", LOGIN_PAGE);
        for _ in 0..4 {
            stub.reply("https://m.vk.com/login?act=authcheck", authcheck_page);
        }
        let resolver = CallbackResolver::new().on_two_factor(|_| Ok("000000".into()));

        let err = run(&identity(None), stub, &resolver).await.unwrap_err();
        assert!(matches!(err, VkError::Auth(AuthError::TooManyChallenges(3))));
    }

    #[tokio::test]
    async fn grant_error_is_reported() {
        let stub = StubTransport::new();
        stub.reply("https://m.vk.com/", LOGIN_PAGE)
            .reply("https://m.vk.com/feed", "<html>feed</html>")
            .reply(
                "https://oauth.vk.com/authorize",
                r#"{"error":"invalid_client","error_description":"client_id is incorrect"}"#,
            );
        stub.set_cookie("remixsid", "abc");

        let err = run(&identity(None), stub, &NonInteractiveResolver)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "auth error: VK error: [invalid_client] client_id is incorrect"
        );
    }

    #[tokio::test]
    async fn grant_confirmation_form_is_followed() {
        let stub = StubTransport::new();
        stub.reply("https://m.vk.com/", LOGIN_PAGE)
            .reply("https://m.vk.com/feed", "<html>feed</html>")
            .reply(
                "https://oauth.vk.com/authorize?client_id=123",
                r#"<form action="https://login.vk.com/?act=grant_access&amp;hash=1"></form>"#,
            )
            .reply("https://oauth.vk.com/blank.html#access_token=granted_token_1", "");
        stub.set_cookie("remixsid", "abc");

        let credential = run(&identity(None), stub.clone(), &NonInteractiveResolver)
            .await
            .unwrap();
        assert_eq!(credential.token(), "granted_token_1");
        let last = stub.requests().pop().unwrap();
        assert_eq!(last.method, http::Method::GET);
        assert_eq!(last.url.as_str(), "https://login.vk.com/?act=grant_access&hash=1");
    }
}
