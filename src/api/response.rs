//! Remote errors and response-body interpretation.

use std::fmt;

use serde_json::Value;

pub const AUTHORIZATION_FAILED: i64 = 5;
pub const PERMISSION_IS_DENIED: i64 = 7;
pub const CAPTCHA_IS_NEEDED: i64 = 14;
pub const ACCESS_DENIED: i64 = 15;
pub const USER_IS_DELETED_OR_BANNED: i64 = 18;
pub const INVALID_USER_ID: i64 = 113;

/// Error object reported by the remote side, either under `error` or as an
/// entry of `execute_errors`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
    /// Echo of the call parameters, in the order the server sent them.
    pub request_params: Vec<(String, String)>,
    pub redirect_uri: Option<String>,
    pub captcha_sid: Option<String>,
    pub captcha_img: Option<String>,
    /// The error object as received.
    pub raw: Value,
}

impl RemoteError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_params: Vec::new(),
            redirect_uri: None,
            captcha_sid: None,
            captcha_img: None,
            raw: Value::Null,
        }
    }

    /// Read an error object. Missing fields are tolerated.
    pub fn from_value(value: &Value) -> Self {
        let text = |key: &str| -> Option<String> {
            match value.get(key)? {
                Value::String(text) => Some(text.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            }
        };

        let request_params = value
            .get("request_params")
            .and_then(Value::as_array)
            .map(|params| {
                params
                    .iter()
                    .filter_map(|param| {
                        let key = param.get("key")?.as_str()?.to_string();
                        let value = match param.get("value")? {
                            Value::String(text) => text.clone(),
                            other => other.to_string(),
                        };
                        Some((key, value))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            code: value.get("error_code").and_then(Value::as_i64).unwrap_or(0),
            message: text("error_msg").unwrap_or_default(),
            request_params,
            redirect_uri: text("redirect_uri"),
            captcha_sid: text("captcha_sid"),
            captcha_img: text("captcha_img"),
            raw: value.clone(),
        }
    }

    pub fn is_captcha_needed(&self) -> bool {
        self.code == CAPTCHA_IS_NEEDED
    }

    /// The credential was rejected: authorization failed outright, or access
    /// was denied because of the `access_token`.
    pub fn is_access_token_incorrect(&self) -> bool {
        self.code == AUTHORIZATION_FAILED
            || (self.code == ACCESS_DENIED && self.message.contains("access_token"))
    }

    pub fn is_user_deleted_or_banned(&self) -> bool {
        self.code == USER_IS_DELETED_OR_BANNED
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error_code={}, message='{}', request_params={:?}",
            self.code, self.message, self.request_params
        )?;
        if let Some(uri) = &self.redirect_uri {
            write!(f, ", redirect_uri='{uri}'")?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteError {}

/// Values of a body made of one or more concatenated JSON documents, decoded
/// one at a time.
pub fn json_iter_parse(
    body: &str,
) -> impl Iterator<Item = Result<Value, serde_json::Error>> + '_ {
    serde_json::Deserializer::from_str(body).into_iter::<Value>()
}

/// What a method-call response means.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    /// Content of `response`, untouched.
    Result(Value),
    /// Top-level `error`; may be recoverable.
    Error(RemoteError),
    /// First entry of `execute_errors`.
    ExecuteError(RemoteError),
    /// No object carried any of the known keys.
    Unrecognized,
}

/// Inspect the objects of `body` in order; the first one carrying `error`,
/// `execute_errors` or `response` decides.
///
/// Decoding stops at the deciding object, so malformed trailing bytes only
/// fail the body when nothing before them decided.
pub fn interpret_body(body: &str) -> Result<ResponseOutcome, serde_json::Error> {
    for object in json_iter_parse(body) {
        let object = object?;
        if let Some(error) = object.get("error") {
            return Ok(ResponseOutcome::Error(RemoteError::from_value(error)));
        }
        if let Some(errors) = object.get("execute_errors") {
            let first = errors
                .as_array()
                .and_then(|errors| errors.first())
                .unwrap_or(errors);
            return Ok(ResponseOutcome::ExecuteError(RemoteError::from_value(first)));
        }
        if let Some(response) = object.get("response") {
            return Ok(ResponseOutcome::Result(response.clone()));
        }
    }
    Ok(ResponseOutcome::Unrecognized)
}
