//! Structured extraction from login pages and redirect URLs.
//!
//! Everything here is pure: the functions take a body (and sometimes the URL
//! it was served from) and return the bits the auth engine needs.

mod challenge;
mod html;
mod query;

pub use challenge::{LoginChallenge, classify_login_response};
pub use html::{
    check_html_warnings, find_html_warnings, parse_captcha_html, parse_form_action_url,
    parse_masked_phone_number,
};
pub use query::{parse_url_query_params, query_param};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no form found on the page")]
    NoForm,
    #[error("page holds {0} forms, expected exactly one")]
    AmbiguousForms(usize),
    #[error("form has no action url")]
    MissingFormAction,
    #[error("phone number mask not found on the page")]
    MissingPhoneMask,
    #[error("{0}")]
    PageWarnings(String),
    #[error("captcha sid or image not found")]
    MissingCaptcha,
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}
