//! Save/scan decision for fetched content.

use crate::models::PolicyConfig;

/// What to do with a fetched resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentDecision {
    /// Keep the content
    pub save: bool,
    /// Parse it for outbound links
    pub scan: bool,
}

/// Rules applied after the response headers are known.
#[derive(Debug, Clone)]
pub struct ContentPolicy {
    accept_all: bool,
    extensions: Vec<String>,
    media_types: Vec<String>,
    scan_targets: Vec<String>,
    min_bytes: Option<f64>,
    max_bytes: Option<f64>,
}

impl ContentPolicy {
    pub fn new(config: &PolicyConfig) -> Self {
        let bound = |kb: f64| (kb > 0.0).then_some(kb * 1024.0);

        Self {
            accept_all: config.accept_all_files,
            extensions: config
                .accepted_extensions
                .iter()
                .map(|e| format!(".{}", e.trim().trim_start_matches('.').to_lowercase()))
                .collect(),
            media_types: config.accepted_media_types.iter().map(|m| essence(m)).collect(),
            scan_targets: config.scan_target_media_types.iter().map(|m| essence(m)).collect(),
            min_bytes: bound(config.minimum_allowed_file_size_kb),
            max_bytes: bound(config.maximum_allowed_file_size_kb),
        }
    }

    /// Decide for one resource. Unknown media type or size never match
    /// their respective rules.
    pub fn decide(&self, url: &str, media_type: Option<&str>, size_bytes: Option<u64>) -> ContentDecision {
        let media = media_type.map(essence);

        let extension_ok = extension(url).is_some_and(|ext| self.extensions.contains(&ext));
        let media_ok = media.as_ref().is_some_and(|m| self.media_types.contains(m));

        ContentDecision {
            save: self.accept_all || extension_ok || media_ok || self.size_within_bounds(size_bytes),
            scan: media.as_ref().is_some_and(|m| self.scan_targets.contains(m)),
        }
    }

    fn size_within_bounds(&self, size_bytes: Option<u64>) -> bool {
        if self.min_bytes.is_none() && self.max_bytes.is_none() {
            return false;
        }
        let Some(size) = size_bytes.map(|s| s as f64) else {
            return false;
        };
        self.min_bytes.is_none_or(|min| size >= min) && self.max_bytes.is_none_or(|max| size <= max)
    }
}

/// `Text/HTML; charset=utf-8` -> `text/html`
fn essence(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// Lowercase extension of the last path segment, dot included.
fn extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let path = crate::utils::url::strip_scheme(path);
    let segment = path.split_once('/')?.1.rsplit('/').next()?;
    let dot = segment.rfind('.')?;
    let ext = &segment[dot..];
    (ext.len() > 1).then(|| ext.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_policy(configure: impl FnOnce(&mut PolicyConfig)) -> ContentPolicy {
        let mut config = PolicyConfig::default();
        configure(&mut config);
        ContentPolicy::new(&config)
    }

    #[test]
    fn test_html_is_scanned_not_saved() {
        let policy = content_policy(|_| {});
        let decision = policy.decide("http://a.com/index", Some("text/html; charset=utf-8"), Some(5000));
        assert_eq!(decision, ContentDecision { save: false, scan: true });
    }

    #[test]
    fn test_accepted_extension_saves() {
        let policy = content_policy(|_| {});
        assert!(policy.decide("http://a.com/img/Cat.JPG?size=2", None, None).save);
        assert!(!policy.decide("http://a.com/archive.zip", None, None).save);
        assert!(!policy.decide("http://a.com.jpg", None, None).save);
    }

    #[test]
    fn test_accepted_media_type_saves() {
        let policy = content_policy(|_| {});
        let decision = policy.decide("http://a.com/download", Some("Application/PDF"), None);
        assert!(decision.save);
        assert!(!decision.scan);
    }

    #[test]
    fn test_accept_all() {
        let policy = content_policy(|c| c.accept_all_files = true);
        assert!(policy.decide("http://a.com/whatever.bin", Some("application/octet-stream"), None).save);
    }

    #[test]
    fn test_size_bounds_accept_when_configured() {
        let policy = content_policy(|c| {
            c.minimum_allowed_file_size_kb = 1.0;
            c.maximum_allowed_file_size_kb = 10.0;
        });

        assert!(policy.decide("http://a.com/blob", None, Some(4096)).save);
        assert!(!policy.decide("http://a.com/blob", None, Some(100)).save);
        assert!(!policy.decide("http://a.com/blob", None, Some(20 * 1024)).save);
        assert!(!policy.decide("http://a.com/blob", None, None).save);
    }

    #[test]
    fn test_no_bounds_never_saves_by_size() {
        let policy = content_policy(|_| {});
        assert!(!policy.decide("http://a.com/blob", None, Some(4096)).save);
    }

    #[test]
    fn test_extensions_without_dot_accepted() {
        let policy = content_policy(|c| c.accepted_extensions = vec!["PDF".to_string()]);
        assert!(policy.decide("http://a.com/doc.pdf", None, None).save);
    }
}
