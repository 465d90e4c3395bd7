use once_cell::sync::Lazy;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

use crate::data_models::RawResult;
use crate::text::collapse_whitespace;

/// Turns a search engine's results page into result entries.
///
/// Returns one item per result container, in document order. A container
/// without a title link yields `None` so callers can still count it against
/// their result limit. Selector sets are tied to the engine's current markup
/// and will need updating when that markup changes.
pub trait ResultParser: Send + Sync {
    fn parse(&self, html: &str) -> Vec<Option<RawResult>>;
}

static DDG_CONTAINER: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".links_main").expect("static selector"));
static DDG_TITLE_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.result__a").expect("static selector"));
static DDG_SNIPPET: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".result__snippet").expect("static selector"));

/// Parser for DuckDuckGo's HTML (no-JS) results page.
#[derive(Debug, Default, Clone, Copy)]
pub struct DuckDuckGoParser;

impl ResultParser for DuckDuckGoParser {
    fn parse(&self, html: &str) -> Vec<Option<RawResult>> {
        let document = Html::parse_document(html);
        document
            .select(&DDG_CONTAINER)
            .map(|container| {
                let link = container.select(&DDG_TITLE_LINK).next()?;
                let snippet = container
                    .select(&DDG_SNIPPET)
                    .next()
                    .map(element_text)
                    .unwrap_or_default();
                Some(RawResult {
                    title: element_text(link),
                    url: resolve_redirect(link.value().attr("href").unwrap_or("")),
                    snippet,
                })
            })
            .collect()
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

/// DuckDuckGo wraps result links as `//duckduckgo.com/l/?uddg=<encoded target>&rut=...`.
/// Returns the decoded target, or the href unchanged when it is not such a link.
pub fn resolve_redirect(href: &str) -> String {
    let href = href.trim();
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    if let Ok(url) = Url::parse(&absolute) {
        if let Some((_, target)) = url.query_pairs().find(|(key, _)| key == "uddg") {
            return target.into_owned();
        }
    }
    href.to_string()
}
