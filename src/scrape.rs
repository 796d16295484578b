use anyhow::Result;
use async_trait::async_trait;
use indicatif::ProgressBar;
use reqwest::StatusCode;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::report::RunStats;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Error accessing the page: {0}")]
    Status(u16),

    #[error("Request failed: {0}")]
    Network(String),

    #[error("Can't find content of webpage.")]
    ContainerNotFound,

    #[error("Page has no paragraph text")]
    Empty,
}

/// `{"urls": [...]}` input document.
#[derive(Debug, Deserialize)]
pub struct UrlList {
    #[serde(default)]
    pub urls: Vec<String>,
}

/// Fetches page bodies. Split out so the loop can run against fixtures.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, ScrapeError>;
}

pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageSource for HttpSource {
    async fn fetch(&self, url: &str) -> Result<String, ScrapeError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScrapeError::Network(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(ScrapeError::Status(response.status().as_u16()));
        }

        response.text().await.map_err(|e| ScrapeError::Network(e.to_string()))
    }
}

/// Scrape results, partitioned. Every input URL lands in exactly one side.
pub struct ScrapeOutput {
    /// identifier -> {"description": text}
    pub descriptions: Map<String, Value>,
    pub failed: Vec<String>,
    pub stats: RunStats,
}

/// Text of the container's direct `<p>` children, trimmed, blank ones dropped,
/// joined by an empty line.
pub fn extract_description(html: &str, container: &Selector) -> Result<String, ScrapeError> {
    let doc = Html::parse_document(html);
    let root = doc.select(container).next().ok_or(ScrapeError::ContainerNotFound)?;

    let paragraphs: Vec<String> = root
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "p")
        .map(|p| p.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    if paragraphs.is_empty() {
        return Err(ScrapeError::Empty);
    }
    Ok(paragraphs.join("\n\n"))
}

/// Last non-empty path segment of the URL, e.g. `Sodium_benzoate`.
pub fn identifier(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_string()
}

/// Replace every newline in every string, recursing through maps and lists.
pub fn clean_newlines(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.replace('\n', " ")),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), clean_newlines(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(clean_newlines).collect()),
        other => other.clone(),
    }
}

pub async fn scrape_all(
    source: &dyn PageSource,
    urls: &[String],
    container: &Selector,
    pb: &ProgressBar,
) -> ScrapeOutput {
    let mut descriptions = Map::new();
    let mut failed = Vec::new();
    let mut stats = RunStats::default();

    for url in urls {
        let outcome = match source.fetch(url).await {
            Ok(html) => extract_description(&html, container),
            Err(e) => Err(e),
        };
        stats.record(&outcome);

        match outcome {
            Ok(text) => {
                let name = identifier(url);
                if descriptions.insert(name.clone(), json!({ "description": text })).is_some() {
                    warn!("Duplicate identifier {}, keeping the latest page", name);
                }
            }
            Err(e) => {
                warn!("Failed to scrape {}: {}", url, e);
                failed.push(url.clone());
            }
        }
        pb.inc(1);
    }

    info!("Scraped {} pages ({} ok, {} errors)", stats.total, stats.ok, stats.errors);
    ScrapeOutput { descriptions, failed, stats }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    fn container() -> Selector {
        Selector::parse("div.mw-parser-output").unwrap()
    }

    struct FixtureSource {
        pages: HashMap<String, Result<String, u16>>,
    }

    #[async_trait]
    impl PageSource for FixtureSource {
        async fn fetch(&self, url: &str) -> Result<String, ScrapeError> {
            match self.pages.get(url) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(status)) => Err(ScrapeError::Status(*status)),
                None => Err(ScrapeError::Network("connection refused".into())),
            }
        }
    }

    #[test]
    fn top_level_paragraphs_only() {
        let text = extract_description(&fixture("sodium_benzoate"), &container()).unwrap();
        assert!(text.starts_with("Sodium benzoate is"));
        assert!(text.contains("\n\n"));
        assert!(!text.contains("Nested"));
        assert!(!text.contains("Infobox"));
        assert_eq!(text, text.trim());
    }

    #[test]
    fn missing_container() {
        let err = extract_description(&fixture("no_container"), &container()).unwrap_err();
        assert!(matches!(err, ScrapeError::ContainerNotFound));
    }

    #[test]
    fn container_without_text() {
        let html = r#"<html><body><div class="mw-parser-output"><p>  </p><table></table></div></body></html>"#;
        assert!(matches!(extract_description(html, &container()), Err(ScrapeError::Empty)));
    }

    #[test]
    fn identifier_is_last_segment() {
        assert_eq!(identifier("https://en.wikipedia.org/wiki/Sodium_benzoate"), "Sodium_benzoate");
        assert_eq!(identifier("https://en.wikipedia.org/wiki/E211/"), "E211");
        assert_eq!(identifier("https://en.wikipedia.org/wiki/Citric_acid#Uses"), "Citric_acid");
    }

    #[test]
    fn clean_newlines_recurses_and_is_idempotent() {
        let v = json!({"a": {"description": "one\n\ntwo"}, "b": ["x\ny", 3]});
        let once = clean_newlines(&v);
        assert_eq!(once, json!({"a": {"description": "one  two"}, "b": ["x y", 3]}));
        assert_eq!(clean_newlines(&once), once);
    }

    #[tokio::test]
    async fn urls_partition_into_ok_and_failed() {
        let ok_page = fixture("sodium_benzoate");
        let pages = HashMap::from([
            ("https://w/wiki/Sodium_benzoate".to_string(), Ok(ok_page.clone())),
            ("https://w/wiki/Missing".to_string(), Err(404)),
            ("https://w/wiki/Bare".to_string(), Ok(fixture("no_container"))),
            ("https://w/wiki/Citric_acid".to_string(), Ok(ok_page)),
        ]);
        let source = FixtureSource { pages };
        let urls: Vec<String> = vec![
            "https://w/wiki/Sodium_benzoate".into(),
            "https://w/wiki/Missing".into(),
            "https://w/wiki/Bare".into(),
            "https://w/wiki/Citric_acid".into(),
            "https://w/wiki/Unreachable".into(),
        ];

        let out = scrape_all(&source, &urls, &container(), &ProgressBar::hidden()).await;

        assert_eq!(out.stats, RunStats { total: 5, ok: 2, errors: 3 });
        assert_eq!(out.descriptions.len() + out.failed.len(), urls.len());
        for url in &urls {
            let ok = out.descriptions.contains_key(&identifier(url));
            let failed = out.failed.contains(url);
            assert!(ok ^ failed, "{} must be in exactly one side", url);
        }
        assert!(out.descriptions["Citric_acid"]["description"].is_string());
    }
}
