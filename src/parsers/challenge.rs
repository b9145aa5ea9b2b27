use url::Url;

use super::ParseError;
use super::html::{
    find_html_warnings, parse_captcha_html, parse_form_action_url, parse_masked_phone_number,
};
use super::query::query_param;

/// Obstacle presented by the login flow between credentials and session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginChallenge {
    /// Captcha must be solved; credentials are resubmitted with the answer.
    Captcha {
        sid: String,
        image_url: Url,
        /// Form action of the challenge page, when it carries one.
        submit_url: Option<String>,
    },
    /// A one-time code from an authenticator app or SMS.
    TwoFactor { submit_url: String },
    /// "Enter the missing digits of your phone number".
    PhoneConfirmation {
        prefix: String,
        suffix: String,
        submit_url: String,
    },
    /// The page refuses to continue and shows a message instead.
    WarningAck { message: String },
}

impl LoginChallenge {
    pub fn kind(&self) -> &'static str {
        match self {
            LoginChallenge::Captcha { .. } => "captcha",
            LoginChallenge::TwoFactor { .. } => "two_factor",
            LoginChallenge::PhoneConfirmation { .. } => "phone_confirmation",
            LoginChallenge::WarningAck { .. } => "warning",
        }
    }
}

/// Decide which challenge, if any, a login response presents.
///
/// `url` is the final URL after redirects. `captcha_endpoint` is used to build
/// the image URL when the redirect only carries `s`/`sid`.
pub fn classify_login_response(
    url: &Url,
    body: &str,
    captcha_endpoint: &Url,
) -> Result<Option<LoginChallenge>, ParseError> {
    let raw_url = url.as_str();

    if let Some(sid) = query_param(raw_url, false, "sid") {
        let image_url = match query_param(raw_url, false, "s") {
            Some(s) => {
                let mut image = captcha_endpoint.clone();
                image
                    .query_pairs_mut()
                    .clear()
                    .append_pair("s", &s)
                    .append_pair("sid", &sid);
                image
            }
            None => parse_captcha_html(body, url)?.1,
        };
        return Ok(Some(LoginChallenge::Captcha {
            sid,
            image_url,
            submit_url: parse_form_action_url(body).ok(),
        }));
    }

    match query_param(raw_url, false, "act").as_deref() {
        Some("authcheck") => {
            let submit_url = parse_form_action_url(body)?;
            Ok(Some(LoginChallenge::TwoFactor { submit_url }))
        }
        Some("security_check") => {
            let warnings = find_html_warnings(body);
            if !warnings.is_empty() {
                return Ok(Some(LoginChallenge::WarningAck {
                    message: warnings.join("; "),
                }));
            }
            let submit_url = parse_form_action_url(body)?;
            let (prefix, suffix) = parse_masked_phone_number(body)?;
            Ok(Some(LoginChallenge::PhoneConfirmation {
                prefix,
                suffix,
                submit_url,
            }))
        }
        _ if body.contains("captcha_sid") => {
            let (sid, image_url) = parse_captcha_html(body, url)?;
            Ok(Some(LoginChallenge::Captcha {
                sid,
                image_url,
                submit_url: parse_form_action_url(body).ok(),
            }))
        }
        _ => Ok(None),
    }
}
