use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::InvalidResult;

pub const SEARCH_PREFIX: &str = "[SEARCH]";
pub const DEFAULT_MODEL_KEY: &str = "gpt-4o-mini";

/// One result entry as it appears in the search engine's markup, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

impl RawResult {
    pub fn validate(&self) -> Result<(), InvalidResult> {
        if self.title.trim().is_empty() {
            return Err(InvalidResult::MissingTitle);
        }
        if !is_http_url(&self.url) {
            return Err(InvalidResult::BadSource(self.url.clone()));
        }
        Ok(())
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    title: String,
    content: String,
    source: String,
    snippet: String,
    error: bool,
}

impl SearchResult {
    /// Builds a result from a parsed entry and the fetched page text.
    /// Empty page text falls back to the entry's snippet.
    pub fn new(raw: RawResult, content: String) -> Result<SearchResult, InvalidResult> {
        raw.validate()?;
        let content = if content.trim().is_empty() {
            raw.snippet.clone()
        } else {
            content
        };
        Ok(SearchResult {
            title: raw.title,
            content,
            source: raw.url,
            snippet: raw.snippet,
            error: false,
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn snippet(&self) -> &str {
        &self.snippet
    }

    pub fn is_error(&self) -> bool {
        self.error
    }
}

pub fn is_http_url(url: &str) -> bool {
    Url::parse(url)
        .map(|u| (u.scheme() == "http" || u.scheme() == "https") && u.has_host())
        .unwrap_or(false)
}

#[derive(Deserialize, Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_model() -> String {
    DEFAULT_MODEL_KEY.to_string()
}

/// What a chat message asks for: a plain completion, or a search-augmented one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatTurn {
    Plain(String),
    Search(String),
}

impl ChatTurn {
    pub fn parse(message: &str) -> ChatTurn {
        match message.strip_prefix(SEARCH_PREFIX) {
            Some(query) => ChatTurn::Search(query.trim_start().to_string()),
            None => ChatTurn::Plain(message.to_string()),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            ChatTurn::Plain(text) | ChatTurn::Search(text) => text,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamEvent {
    Content(String),
    Error(String),
}
