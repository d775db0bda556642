// src/policy/mod.rs

//! URL admission rules.
//!
//! [`UrlPolicy`] is a pure function of the configured rule set. It is
//! consulted by the frontier before a URL may enter the queue. The later
//! save/scan decision, made once content type and size are known, lives in
//! [`content`].

pub mod content;
mod pattern;

pub use content::{ContentDecision, ContentPolicy};
pub use pattern::UrlPattern;

use crate::error::Result;
use crate::models::PolicyConfig;
use crate::utils::url::get_domain;

/// Why a URL was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No host could be extracted
    NoHost,
    /// Whitelist is set and no entry covers the host
    NotWhitelisted,
    /// A blacklist entry covers the host
    DomainBlacklisted,
    /// Must-match patterns are set and none matched
    NoPatternMatched,
    /// A blacklisted pattern matched
    PatternBlacklisted,
}

/// Compiled admission rules.
#[derive(Debug, Clone, Default)]
pub struct UrlPolicy {
    domain_whitelist: Vec<String>,
    domain_blacklist: Vec<String>,
    must_match: Vec<UrlPattern>,
    blacklisted: Vec<UrlPattern>,
}

impl UrlPolicy {
    /// Build from configuration. Fails only if a glob does not compile.
    pub fn new(config: &PolicyConfig) -> Result<Self> {
        Ok(Self {
            domain_whitelist: normalize_domains(&config.domain_whitelist),
            domain_blacklist: normalize_domains(&config.domain_blacklist),
            must_match: pattern::compile_all(&config.url_must_match_patterns)?,
            blacklisted: pattern::compile_all(&config.blacklisted_url_patterns)?,
        })
    }

    /// Policy that admits every URL with a host.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Evaluate the rules in precedence order.
    ///
    /// Whitelist, then domain blacklist, then must-match patterns, then
    /// blacklisted patterns as the final veto.
    pub fn evaluate(&self, url: &str) -> std::result::Result<(), Rejection> {
        let host = get_domain(url).ok_or(Rejection::NoHost)?;
        self.check_host(&host)?;

        if !self.is_url_match(url) {
            return Err(Rejection::NoPatternMatched);
        }
        if self.is_url_blacklisted(url) {
            return Err(Rejection::PatternBlacklisted);
        }
        Ok(())
    }

    fn check_host(&self, host: &str) -> std::result::Result<(), Rejection> {
        if !self.domain_whitelist.is_empty()
            && !self.domain_whitelist.iter().any(|d| covers(d, host))
        {
            return Err(Rejection::NotWhitelisted);
        }
        if self.domain_blacklist.iter().any(|d| covers(d, host)) {
            return Err(Rejection::DomainBlacklisted);
        }
        Ok(())
    }

    /// Whether the URL may enter the frontier.
    pub fn admit(&self, url: &str) -> bool {
        self.evaluate(url).is_ok()
    }

    /// Host check only: whitelist and domain blacklist.
    pub fn is_domain_allowed(&self, url: &str) -> bool {
        get_domain(url).is_some_and(|host| self.check_host(&host).is_ok())
    }

    /// Whether the URL satisfies the must-match patterns (true when none are set).
    pub fn is_url_match(&self, url: &str) -> bool {
        self.must_match.is_empty() || self.must_match.iter().any(|p| p.matches(url))
    }

    /// Whether any blacklisted pattern matches.
    pub fn is_url_blacklisted(&self, url: &str) -> bool {
        self.blacklisted.iter().any(|p| p.matches(url))
    }
}

/// `entry` covers `host` when equal or when `host` is a subdomain of it.
fn covers(entry: &str, host: &str) -> bool {
    host == entry
        || host
            .strip_suffix(entry)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn normalize_domains(domains: &[String]) -> Vec<String> {
    domains
        .iter()
        .map(|d| {
            d.trim()
                .trim_start_matches("*.")
                .trim_matches('.')
                .to_lowercase()
        })
        .filter(|d| !d.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(configure: impl FnOnce(&mut PolicyConfig)) -> UrlPolicy {
        let mut config = PolicyConfig::default();
        configure(&mut config);
        UrlPolicy::new(&config).unwrap()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_rules_admit_everything_with_host() {
        let policy = UrlPolicy::allow_all();
        assert!(policy.admit("http://example.com/a"));
        assert!(policy.admit("example.com"));
        assert!(!policy.admit("/relative/path"));
    }

    #[test]
    fn test_whitelist_with_blacklisted_subdomains() {
        let policy = policy(|c| {
            c.domain_whitelist = strings(&["testsite.com"]);
            c.domain_blacklist = strings(&["www.testsite.com", "cdn.testsite.com"]);
        });

        assert!(policy.admit("testsite.com/x"));
        assert!(!policy.admit("www.testsite.com/x"));
        assert!(policy.admit("app.testsite.com/x"));
        assert!(!policy.admit("CDN.testsite.com/x"));
        assert_eq!(policy.evaluate("www.testsite.com/x"), Err(Rejection::DomainBlacklisted));
    }

    #[test]
    fn test_whitelist_rejects_other_hosts() {
        let policy = policy(|c| c.domain_whitelist = strings(&["testsite.com"]));

        assert!(!policy.admit("facebook.com/testsite.com/page/123"));
        assert!(!policy.admit("mytestsite.com/page"));
        assert!(!policy.admit("testsite.com.evil.org/page"));
        assert!(policy.admit("https://deep.cdn.testsite.com/page"));
        assert_eq!(policy.evaluate("facebook.com/"), Err(Rejection::NotWhitelisted));
    }

    #[test]
    fn test_blacklist_entry_covers_own_subdomains() {
        let policy = policy(|c| c.domain_blacklist = strings(&["facebook.com"]));

        assert!(!policy.admit("http://facebook.com/page"));
        assert!(!policy.admit("http://www.facebook.com/page"));
        assert!(policy.admit("http://notfacebook.com/page"));
        assert!(!policy.is_domain_allowed("m.facebook.com"));
    }

    #[test]
    fn test_must_match_path_pattern() {
        let policy = policy(|c| c.url_must_match_patterns = strings(&["/page/*"]));

        assert!(policy.admit("facebook.com/page/123"));
        assert!(policy.admit("testsite.com/page/123"));
        assert!(!policy.admit("facebook.com/original/123"));
        assert_eq!(policy.evaluate("facebook.com/original/123"), Err(Rejection::NoPatternMatched));
    }

    #[test]
    fn test_blacklisted_patterns_are_final_veto() {
        let policy = policy(|c| {
            c.url_must_match_patterns = strings(&["*"]);
            c.blacklisted_url_patterns = strings(&["cdn.testsite.com/*/1*", "face*.com*"]);
        });

        assert!(!policy.admit("facebook.com/page/123"));
        assert!(!policy.admit("cdn.testsite.com/page/123"));
        assert!(policy.admit("testsite.com/page/123"));
        assert!(policy.is_url_match("facebook.com/page/123"));
        assert!(policy.is_url_blacklisted("facebook.com/page/123"));
    }

    #[test]
    fn test_whitelist_checked_before_patterns() {
        let policy = policy(|c| {
            c.domain_whitelist = strings(&["testsite.com"]);
            c.url_must_match_patterns = strings(&["/page/*"]);
        });

        assert_eq!(policy.evaluate("facebook.com/page/1"), Err(Rejection::NotWhitelisted));
        assert!(policy.admit("cdn.testsite.com/page/1"));
    }

    #[test]
    fn test_domain_entries_normalized() {
        let policy = policy(|c| c.domain_whitelist = strings(&[" *.TestSite.com. ", ""]));
        assert!(policy.admit("www.testsite.com/x"));
        assert!(policy.admit("testsite.com"));
    }

    #[test]
    fn test_blank_patterns_ignored() {
        let mut config = PolicyConfig::default();
        config.blacklisted_url_patterns = strings(&["  "]);
        assert!(UrlPolicy::new(&config).is_ok());
    }
}
