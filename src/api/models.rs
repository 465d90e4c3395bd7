use serde::{Deserialize, Serialize};

use crate::data_models::SearchResult;
use crate::search::DEFAULT_MAX_RESULTS;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct TestSearchParams {
    #[serde(default)]
    pub query: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

#[derive(Debug, Serialize)]
pub struct TestSearchResponse {
    pub status: &'static str,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}
