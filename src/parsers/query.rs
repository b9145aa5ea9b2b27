use url::form_urlencoded;

/// Decode the query string (or the fragment when `fragment` is set) of `url`.
///
/// Works on absolute URLs as well as bare paths such as
/// `/login.php?act=security_check&hash=...`. Pairs keep their order.
pub fn parse_url_query_params(url: &str, fragment: bool) -> Vec<(String, String)> {
    let raw = if fragment {
        url.split_once('#').map(|(_, frag)| frag)
    } else {
        let without_fragment = url.split('#').next().unwrap_or(url);
        without_fragment.split_once('?').map(|(_, query)| query)
    };

    raw.map(|raw| form_urlencoded::parse(raw.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

/// First value of `key` in the query (or fragment) of `url`.
pub fn query_param(url: &str, fragment: bool, key: &str) -> Option<String> {
    parse_url_query_params(url, fragment)
        .into_iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_fragment_of_grant_redirect() {
        let params = parse_url_query_params(
            "https://oauth.vk.com/blank.html#access_token=abc123&expires_in=0&user_id=42",
            true,
        );
        assert_eq!(
            params,
            vec![
                ("access_token".to_string(), "abc123".to_string()),
                ("expires_in".to_string(), "0".to_string()),
                ("user_id".to_string(), "42".to_string()),
            ]
        );
    }

    #[test]
    fn query_ignores_fragment_and_decodes() {
        let url = "/login.php?act=security_check&to=&hash=4b07a4650e9f22038b#frag=1";
        assert_eq!(query_param(url, false, "hash").as_deref(), Some("4b07a4650e9f22038b"));
        assert_eq!(query_param(url, false, "to").as_deref(), Some(""));
        assert_eq!(query_param(url, false, "frag"), None);
        assert_eq!(query_param("https://x/?q=a%20b", false, "q").as_deref(), Some("a b"));
    }

    #[test]
    fn missing_parts_yield_nothing() {
        assert!(parse_url_query_params("https://m.vk.com/login", false).is_empty());
        assert!(parse_url_query_params("https://m.vk.com/login?x=1", true).is_empty());
    }
}
