//! HTTP page processor.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use scraper::{Html, Selector};

use crate::crawl::{PageOutcome, PageProcessor};
use crate::error::{AppError, Result};
use crate::models::WorkItem;
use crate::utils::url::resolve;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches over HTTP and extracts `href` links from HTML responses.
pub struct HttpProcessor {
    client: reqwest::Client,
    links: Selector,
}

impl HttpProcessor {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let links = Selector::parse("a[href]")
            .map_err(|e| AppError::config(format!("invalid link selector: {e:?}")))?;

        Ok(Self { client, links })
    }

    fn extract_links(&self, base: &str, body: &str) -> Vec<String> {
        let document = Html::parse_document(body);
        document
            .select(&self.links)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| resolve(base, href))
            .collect()
    }
}

#[async_trait]
impl PageProcessor for HttpProcessor {
    async fn process(&self, item: &WorkItem) -> Result<PageOutcome> {
        let response = self.client.get(&item.url).send().await?.error_for_status()?;

        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let base = response.url().to_string();

        let is_html = media_type
            .as_deref()
            .is_some_and(|m| m.trim().to_ascii_lowercase().starts_with("text/html"));

        let body = response.bytes().await?;
        let links = if is_html {
            self.extract_links(&base, &String::from_utf8_lossy(&body))
        } else {
            Vec::new()
        };

        Ok(PageOutcome {
            media_type,
            size_bytes: Some(body.len() as u64),
            links,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_links_resolves_relative_hrefs() {
        let processor = HttpProcessor::new("crycrawler-test").unwrap();
        let html = r#"
            <a href="/about">About</a>
            <a href="https://other.org/x#top">Other</a>
            <a href="mailto:someone@example.com">Mail</a>
            <a>No href</a>
        "#;

        assert_eq!(
            processor.extract_links("http://example.com/dir/page", html),
            vec!["http://example.com/about", "https://other.org/x#top"]
        );
    }
}
