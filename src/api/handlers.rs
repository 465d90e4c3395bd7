use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
};
use futures::{Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;

use crate::chat::ChatService;
use crate::data_models::{ChatRequest, ChatTurn, StreamEvent};

use super::models::{ErrorResponse, HealthResponse, TestSearchParams, TestSearchResponse};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            ApiError::Internal(detail) => (StatusCode::INTERNAL_SERVER_ERROR, detail),
        };
        (status, Json(ErrorResponse { detail })).into_response()
    }
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

pub async fn chat_handler(
    State(service): State<Arc<ChatService>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Json(request) =
        payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    // a bare "[SEARCH]" prefix carries no question
    if ChatTurn::parse(&request.message).text().trim().is_empty() {
        return Err(ApiError::BadRequest("Message cannot be empty".to_string()));
    }

    let events = service.chat(&request).await.map_err(|e| {
        log::error!("chat request failed: {:#}", e);
        ApiError::Internal(e.to_string())
    })?;

    Ok(Sse::new(events.map(to_sse_event)))
}

fn to_sse_event(event: StreamEvent) -> Result<Event, Infallible> {
    Ok(Event::default().json_data(&event).unwrap_or_else(|e| {
        log::error!("failed to encode stream event: {:#}", e);
        Event::default().data(r#"{"error":"failed to encode event"}"#)
    }))
}

pub async fn test_search_handler(
    State(service): State<Arc<ChatService>>,
    Query(params): Query<TestSearchParams>,
) -> Result<Json<TestSearchResponse>, ApiError> {
    let query = params.query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("Query cannot be empty".to_string()));
    }

    let outcome = service
        .search_client()
        .search(query, params.max_results)
        .await;
    if let Some(failure) = outcome.failure {
        return Err(ApiError::Internal(failure.to_string()));
    }

    Ok(Json(TestSearchResponse {
        status: "success",
        results: outcome.results,
    }))
}
