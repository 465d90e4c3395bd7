use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Node, Selector};
use std::time::Duration;

use crate::error::FetchError;
use crate::text::truncate_chars;

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_CONTENT_CHARS: usize = 10_000;

// Subtrees that never carry readable page content.
const SKIPPED_TAGS: &[&str] = &["script", "style", "nav", "header", "footer", "aside", "noscript"];

static MAIN_CONTENT: Lazy<Selector> =
    Lazy::new(|| Selector::parse("article, main").expect("static selector"));

/// Retrieves a page and reduces it to its readable text.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_chars: usize,
}

impl PageFetcher {
    pub fn new(client: reqwest::Client) -> PageFetcher {
        PageFetcher {
            client,
            timeout: FETCH_TIMEOUT,
            max_chars: MAX_CONTENT_CHARS,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> PageFetcher {
        self.timeout = timeout;
        self
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> PageFetcher {
        self.max_chars = max_chars;
        self
    }

    /// Best-effort fetch: any failure is logged and yields empty text.
    pub async fn fetch(&self, url: &str) -> String {
        match self.try_fetch(url).await {
            Ok(text) => {
                log::info!("fetched page: {url} ({} chars)", text.chars().count());
                text
            }
            Err(FetchError::Status(status)) => {
                log::warn!("failed to fetch page {url}, status: {status}");
                String::new()
            }
            Err(e) => {
                log::error!("error fetching page {url}, error: {:#}", e);
                String::new()
            }
        }
    }

    pub async fn try_fetch(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).timeout(self.timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        let html = response.text().await?;
        Ok(extract_text(&html, self.max_chars))
    }
}

/// Extracts visible text from an HTML document, preferring its `article`/`main`
/// region, with whitespace collapsed and the result capped at `max_chars`.
pub fn extract_text(html: &str, max_chars: usize) -> String {
    let document = Html::parse_document(html);

    let root = document
        .select(&MAIN_CONTENT)
        .find(|el| !inside_skipped(*el))
        .unwrap_or_else(|| document.root_element());

    let mut words = Vec::new();
    collect_words(root, &mut words);
    let text = words.join(" ");
    truncate_chars(&text, max_chars).to_string()
}

fn is_skipped(name: &str) -> bool {
    SKIPPED_TAGS.contains(&name)
}

fn inside_skipped(element: ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| is_skipped(ancestor.value().name()))
}

fn collect_words<'a>(element: ElementRef<'a>, out: &mut Vec<&'a str>) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.extend(text.split_whitespace()),
            Node::Element(el) if !is_skipped(el.name()) => {
                if let Some(child) = ElementRef::wrap(child) {
                    collect_words(child, out);
                }
            }
            _ => {}
        }
    }
}
