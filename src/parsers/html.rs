use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::ParseError;

static FORM_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("form").expect("invalid form selector"));

static PHONE_PREFIX_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span.field_prefix").expect("invalid phone prefix selector"));

static WARNING_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.service_msg_warning").expect("invalid warning selector")
});

static CAPTCHA_SID_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("input[name='captcha_sid']").expect("invalid captcha sid selector")
});

static IMG_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("img[src]").expect("invalid img selector"));

// Inline captcha link, used when the markup lacks the usual input/img pair.
static CAPTCHA_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r#"captcha\.php\?s=(\d+)&(?:amp;)?sid=(\d+)"#)
        .case_insensitive(true)
        .build()
        .expect("invalid captcha link regex")
});

const NBSP: char = '\u{a0}';

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .replace(NBSP, "")
        .trim()
        .to_string()
}

/// Action URL of the only form on the page.
///
/// The returned value is the raw attribute, so it may be relative.
pub fn parse_form_action_url(html: &str) -> Result<String, ParseError> {
    let document = Html::parse_document(html);
    let forms: Vec<ElementRef<'_>> = document.select(&FORM_SELECTOR).collect();

    let form = match forms.as_slice() {
        [] => return Err(ParseError::NoForm),
        [form] => form,
        many => return Err(ParseError::AmbiguousForms(many.len())),
    };

    form.value()
        .attr("action")
        .map(str::trim)
        .filter(|action| !action.is_empty())
        .map(String::from)
        .ok_or(ParseError::MissingFormAction)
}

/// Visible parts of a masked phone number, as `(prefix, suffix)`.
///
/// Pages asking to "enter the missing digits" show the number as
/// `<span class="field_prefix">+1234</span> ... <span class="field_prefix">89</span>`.
pub fn parse_masked_phone_number(html: &str) -> Result<(String, String), ParseError> {
    let document = Html::parse_document(html);
    let mut fields = document.select(&PHONE_PREFIX_SELECTOR).map(element_text);

    match (fields.next(), fields.next()) {
        (Some(prefix), Some(suffix)) => Ok((prefix, suffix)),
        _ => Err(ParseError::MissingPhoneMask),
    }
}

/// Warning messages shown on the page, in document order.
pub fn find_html_warnings(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&WARNING_SELECTOR)
        .map(element_text)
        .filter(|text| !text.is_empty())
        .collect()
}

/// Fail with [`ParseError::PageWarnings`] when the page carries warnings.
pub fn check_html_warnings(html: &str) -> Result<(), ParseError> {
    let warnings = find_html_warnings(html);
    if warnings.is_empty() {
        Ok(())
    } else {
        Err(ParseError::PageWarnings(warnings.join("; ")))
    }
}

/// Captcha sid and absolute image URL from a challenge page.
///
/// Relative image sources are resolved against `response_url`.
pub fn parse_captcha_html(html: &str, response_url: &Url) -> Result<(String, Url), ParseError> {
    let document = Html::parse_document(html);

    let sid = document
        .select(&CAPTCHA_SID_SELECTOR)
        .find_map(|input| input.value().attr("value"))
        .map(str::trim)
        .filter(|sid| !sid.is_empty())
        .map(String::from);

    let image = document
        .select(&IMG_SELECTOR)
        .filter_map(|img| img.value().attr("src"))
        .find(|src| src.contains("captcha.php"))
        .map(|src| response_url.join(src))
        .transpose()?;

    match (sid, image) {
        (Some(sid), Some(image)) => Ok((sid, image)),
        (sid, image) => {
            let raw = html_escape::decode_html_entities(html);
            let captures = CAPTCHA_LINK_RE
                .captures(&raw)
                .ok_or(ParseError::MissingCaptcha)?;
            let link = format!("/captcha.php?s={}&sid={}", &captures[1], &captures[2]);
            let fallback_image = response_url.join(&link)?;
            Ok((
                sid.unwrap_or_else(|| captures[2].to_string()),
                image.unwrap_or(fallback_image),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_form_action_is_returned() {
        let html = r#"<html><body><form method="post" action="https://login.vk.com/?act=login&amp;soft=1">
            <input name="email"></form></body></html>"#;
        assert_eq!(
            parse_form_action_url(html).unwrap(),
            "https://login.vk.com/?act=login&soft=1"
        );
    }

    #[test]
    fn form_count_must_be_exactly_one() {
        assert!(matches!(
            parse_form_action_url("<html><body><p>nothing</p></body></html>"),
            Err(ParseError::NoForm)
        ));
        assert!(matches!(
            parse_form_action_url(r#"<form action="/a"></form><form action="/b"></form>"#),
            Err(ParseError::AmbiguousForms(2))
        ));
        assert!(matches!(
            parse_form_action_url(r#"<form action=" "></form>"#),
            Err(ParseError::MissingFormAction)
        ));
    }

    #[test]
    fn masked_phone_strips_nbsp() {
        let html = "<div><span class=\"field_prefix\">+1234&nbsp;</span>\
            <input name=\"code\"><span class=\"field_prefix\">\u{a0}89</span></div>";
        let (prefix, suffix) = parse_masked_phone_number(html).unwrap();
        assert_eq!(prefix, "+1234");
        assert_eq!(suffix, "89");
        assert!(matches!(
            parse_masked_phone_number("<div></div>"),
            Err(ParseError::MissingPhoneMask)
        ));
    }

    #[test]
    fn masked_phone_needs_both_fragments() {
        let html = r#"<div><span class="field_prefix">+1234</span><input name="code"></div>"#;
        assert!(matches!(
            parse_masked_phone_number(html),
            Err(ParseError::MissingPhoneMask)
        ));
    }

    #[test]
    fn warnings_are_joined() {
        let html = r#"<div class="service_msg service_msg_warning">First.</div>
            <div class="service_msg_warning"> Second. </div>"#;
        let err = check_html_warnings(html).unwrap_err();
        assert_eq!(err.to_string(), "First.; Second.");
        assert!(check_html_warnings("<div class=\"service_msg\">ok</div>").is_ok());
    }

    #[test]
    fn captcha_falls_back_to_inline_link() {
        let html = r#"<script>var img = "/captcha.php?s=1&amp;sid=777";</script>"#;
        let base = Url::parse("https://m.vk.com/login").unwrap();
        let (sid, image) = parse_captcha_html(html, &base).unwrap();
        assert_eq!(sid, "777");
        assert_eq!(image.as_str(), "https://m.vk.com/captcha.php?s=1&sid=777");
    }

    #[test]
    fn captcha_absent_is_an_error() {
        let base = Url::parse("https://m.vk.com/").unwrap();
        assert!(matches!(
            parse_captcha_html("<form action=\"/x\"></form>", &base),
            Err(ParseError::MissingCaptcha)
        ));
    }
}
