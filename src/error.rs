use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(String),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("failed to create http session: {0}")]
    Session(#[source] reqwest::Error),
    #[error("search request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("search engine returned status {0}")]
    Status(StatusCode),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidResult {
    #[error("result has no title")]
    MissingTitle,
    #[error("not an absolute http(s) url: {0:?}")]
    BadSource(String),
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider rejected request ({status}): {message}")]
    Rejected { status: StatusCode, message: String },
    #[error("malformed provider stream: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("provider error: {0}")]
    Provider(String),
}
