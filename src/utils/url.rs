// src/utils/url.rs

//! URL manipulation utilities.
//!
//! The frontier identifies work by [`normalize`]d URL. Policy matching runs on
//! whatever string it is handed, which may lack a scheme, so host extraction
//! here does not depend on a full parse.

use url::Url;

use crate::error::Result;

/// Produce the dedup key for a URL.
///
/// Adds `http://` when no scheme is present, lowercases scheme and host,
/// drops default ports and the fragment.
///
/// # Examples
/// ```
/// use crycrawler::utils::url::normalize;
///
/// assert_eq!(
///     normalize("Example.COM/Path#top").unwrap(),
///     "http://example.com/Path"
/// );
/// ```
pub fn normalize(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let mut parsed = if has_scheme(trimmed) {
        Url::parse(trimmed)?
    } else {
        Url::parse(&format!("http://{trimmed}"))?
    };
    parsed.set_fragment(None);
    Ok(parsed.into())
}

/// Remove a leading `scheme://`, if any.
pub fn strip_scheme(url: &str) -> &str {
    match url.find("://") {
        Some(idx) if is_scheme(&url[..idx]) => &url[idx + 3..],
        _ => url,
    }
}

/// Extract the lowercase host from a URL with or without scheme.
///
/// # Examples
/// ```
/// use crycrawler::utils::url::get_domain;
///
/// assert_eq!(
///     get_domain("CDN.testsite.com/page/1?x=2"),
///     Some("cdn.testsite.com".to_string())
/// );
/// ```
pub fn get_domain(url: &str) -> Option<String> {
    let rest = strip_scheme(url.trim());
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    let host_port = authority.rsplit('@').next().unwrap_or(authority);

    let host = if let Some(bracketed) = host_port.strip_prefix('[') {
        // IPv6 literal
        bracketed.split(']').next().unwrap_or_default()
    } else {
        host_port.split(':').next().unwrap_or_default()
    };

    let host = host.trim_end_matches('.');
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

/// Resolve a potentially relative link against the page it was found on.
pub fn resolve(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    let joined = base.join(href.trim()).ok()?;
    match joined.scheme() {
        "http" | "https" => Some(joined.into()),
        _ => None,
    }
}

fn has_scheme(url: &str) -> bool {
    url.find("://").is_some_and(|idx| is_scheme(&url[..idx]))
}

fn is_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_adds_scheme_and_lowercases_host() {
        assert_eq!(
            normalize("  WWW.Example.com/A/b?q=1 ").unwrap(),
            "http://www.example.com/A/b?q=1"
        );
    }

    #[test]
    fn test_normalize_drops_fragment_and_default_port() {
        assert_eq!(
            normalize("https://example.com:443/x#section").unwrap(),
            "https://example.com/x"
        );
    }

    #[test]
    fn test_normalize_same_key_for_equivalent_urls() {
        assert_eq!(
            normalize("HTTP://Example.com").unwrap(),
            normalize("http://example.com/").unwrap()
        );
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize("http://").is_err());
    }

    #[test]
    fn test_strip_scheme() {
        assert_eq!(strip_scheme("https://a.com/x"), "a.com/x");
        assert_eq!(strip_scheme("a.com/x"), "a.com/x");
        assert_eq!(strip_scheme("a.com/redirect?to=http://b.com"), "a.com/redirect?to=http://b.com");
    }

    #[test]
    fn test_get_domain() {
        assert_eq!(
            get_domain("https://Example.COM/path"),
            Some("example.com".to_string())
        );
        assert_eq!(
            get_domain("facebook.com/testsite.com/page/123?test=3"),
            Some("facebook.com".to_string())
        );
        assert_eq!(
            get_domain("http://user:pw@sub.example.com:8080/x"),
            Some("sub.example.com".to_string())
        );
        assert_eq!(get_domain("http://[::1]:80/"), Some("::1".to_string()));
        assert_eq!(get_domain("/relative/only"), None);
    }

    #[test]
    fn test_resolve_relative_path() {
        assert_eq!(
            resolve("https://example.com/path/index.html", "other.html"),
            Some("https://example.com/path/other.html".to_string())
        );
        assert_eq!(
            resolve("https://example.com/path/", "/root.html"),
            Some("https://example.com/root.html".to_string())
        );
    }

    #[test]
    fn test_resolve_skips_non_http_links() {
        assert_eq!(resolve("https://example.com/", "mailto:a@b.c"), None);
        assert_eq!(resolve("https://example.com/", "javascript:void(0)"), None);
    }
}
