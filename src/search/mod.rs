use futures::StreamExt;
use futures::stream;
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::data_models::{RawResult, SearchResult};
use crate::error::SearchError;
use crate::fetcher::{FETCH_TIMEOUT, PageFetcher};

pub mod parser;

pub use parser::{DuckDuckGoParser, ResultParser};

pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RESULTS: usize = 3;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Result of a search that always resolves. On failure `results` is empty and
/// `failure` carries the (already logged) cause.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub failure: Option<SearchError>,
}

impl SearchOutcome {
    fn degraded(cause: SearchError) -> SearchOutcome {
        SearchOutcome {
            results: Vec::new(),
            failure: Some(cause),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.failure.is_some()
    }
}

pub struct SearchClient {
    endpoint: String,
    session: Mutex<Option<reqwest::Client>>,
    parser: Box<dyn ResultParser>,
    fetch_concurrency: usize,
    fetch_timeout: Duration,
}

impl SearchClient {
    pub fn new(endpoint: impl Into<String>) -> SearchClient {
        SearchClient {
            endpoint: endpoint.into(),
            session: Mutex::new(None),
            parser: Box::new(DuckDuckGoParser),
            fetch_concurrency: 1,
            fetch_timeout: FETCH_TIMEOUT,
        }
    }

    pub fn with_parser(mut self, parser: impl ResultParser + 'static) -> SearchClient {
        self.parser = Box::new(parser);
        self
    }

    /// Number of result pages fetched at once. Results keep the engine's order
    /// regardless of this setting.
    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> SearchClient {
        self.fetch_concurrency = concurrency.max(1);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> SearchClient {
        self.fetch_timeout = timeout;
        self
    }

    /// Returns the live session, creating it on first use.
    async fn session(&self) -> Result<reqwest::Client, SearchError> {
        let mut session = self.session.lock().await;
        if let Some(client) = session.as_ref() {
            return Ok(client.clone());
        }
        let client = build_session().map_err(SearchError::Session)?;
        log::info!("created new http session");
        *session = Some(client.clone());
        Ok(client)
    }

    pub async fn has_session(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Releases the session. Safe to call any number of times; the next
    /// search creates a fresh one.
    pub async fn close(&self) {
        if self.session.lock().await.take().is_some() {
            log::info!("closed http session");
        }
    }

    pub async fn search(&self, query: &str, max_results: usize) -> SearchOutcome {
        match self.try_search(query, max_results).await {
            Ok(results) => {
                log::info!("search completed with {} results", results.len());
                SearchOutcome {
                    results,
                    failure: None,
                }
            }
            Err(e) => {
                log::error!("search failed for query {query:?}, error: {:#}", e);
                SearchOutcome::degraded(e)
            }
        }
    }

    pub async fn try_search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let client = self.session().await?;
        log::info!("starting search for query: {query}");

        let response = client
            .post(&self.endpoint)
            .form(&[("q", query), ("kl", "us-en"), ("t", "h_"), ("ia", "web")])
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        log::info!("search response status: {status}");
        if !status.is_success() {
            return Err(SearchError::Status(status));
        }
        let html = response.text().await?;

        let accepted = self.accepted_results(&html, max_results);
        let fetcher = PageFetcher::new(client).with_timeout(self.fetch_timeout);

        let fetched: Vec<(RawResult, String)> = stream::iter(accepted)
            .map(|raw| {
                let fetcher = &fetcher;
                async move {
                    log::info!("processing result: {}", raw.title);
                    let content = fetcher.fetch(&raw.url).await;
                    (raw, content)
                }
            })
            .buffered(self.fetch_concurrency)
            .collect()
            .await;

        let mut results = Vec::with_capacity(fetched.len());
        for (raw, content) in fetched {
            match SearchResult::new(raw, content) {
                Ok(result) => results.push(result),
                Err(e) => log::warn!("dropping search result: {e}"),
            }
        }
        Ok(results)
    }

    /// Parses the results page and keeps the usable entries among the first
    /// `max_results` containers.
    fn accepted_results(&self, html: &str, max_results: usize) -> Vec<RawResult> {
        self.parser
            .parse(html)
            .into_iter()
            .take(max_results)
            .flatten()
            .filter(|raw| match raw.validate() {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("skipping search result: {e}");
                    false
                }
            })
            .collect()
    }
}

fn build_session() -> Result<reqwest::Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(header::DNT, HeaderValue::from_static("1"));
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));

    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .build()
}
