//! Glob patterns over URLs.
//!
//! `*` matches any run of characters, `/` included. Matching ignores the
//! scheme and letter case. A pattern that starts with `/` may match at any
//! position; any other pattern starts at the host, optionally behind whole
//! subdomain labels. Every pattern must reach the end of the URL (a single
//! trailing `/` is tolerated so `example.com` still matches the normalized
//! `http://example.com/`).

use regex::Regex;

use crate::error::{AppError, Result};
use crate::utils::url::strip_scheme;

/// A compiled URL glob.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    source: String,
    regex: Regex,
}

impl UrlPattern {
    /// Compile a glob pattern.
    pub fn new(pattern: &str) -> Result<Self> {
        let glob = strip_scheme(pattern.trim());
        if glob.is_empty() {
            return Err(AppError::config("URL pattern can not be empty"));
        }

        let body = glob
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");

        let expr = if glob.starts_with('/') {
            format!("(?i)^.*{body}/?$")
        } else {
            format!(r"(?i)^(?:[^/]*\.)?{body}/?$")
        };

        let regex = Regex::new(&expr)
            .map_err(|e| AppError::config(format!("Invalid URL pattern '{pattern}': {e}")))?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// The pattern as written in the configuration.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the URL (with or without scheme) matches.
    pub fn matches(&self, url: &str) -> bool {
        self.regex.is_match(strip_scheme(url.trim()))
    }
}

/// Compile a list of patterns, skipping blank entries.
pub fn compile_all(patterns: &[String]) -> Result<Vec<UrlPattern>> {
    patterns
        .iter()
        .filter(|p| !p.trim().is_empty())
        .map(|p| UrlPattern::new(p))
        .collect()
}
