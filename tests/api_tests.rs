use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Html,
    routing::{get, post},
};
use futures::stream;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use tower_http::cors::CorsLayer;

use relay::api::create_router;
use relay::chat::ChatService;
use relay::composer::{ContextComposer, FORMATTING_PROMPT, NO_RESULTS};
use relay::error::RelayError;
use relay::relay::{ChatProvider, CompletionRequest, FragmentStream};
use relay::search::SearchClient;

mod test_helpers {
    use super::*;

    pub async fn serve(app: Router) -> Result<SocketAddr> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Ok(addr)
    }

    /// A search engine with a single "France Demographics" result whose page
    /// is served from the same fixture.
    pub async fn france_engine(hits: Arc<AtomicUsize>) -> Result<SocketAddr> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let results = format!(
            r#"<html><body>
                 <div class="links_main result__body">
                   <h2><a class="result__a" href="http://{addr}/france">France Demographics</a></h2>
                   <a class="result__snippet">Population statistics for France.</a>
                 </div>
               </body></html>"#
        );
        let app = Router::new()
            .route(
                "/html/",
                post(move || {
                    let results = results.clone();
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        Html(results)
                    }
                }),
            )
            .route(
                "/france",
                get(|| async {
                    Html("<html><body><main>France has about 68 million inhabitants.</main></body></html>")
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Ok(addr)
    }

    pub async fn failing_engine(hits: Arc<AtomicUsize>) -> Result<SocketAddr> {
        let app = Router::new().route(
            "/html/",
            post(move || {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::BAD_GATEWAY, "upstream down")
                }
            }),
        );
        serve(app).await
    }

    pub async fn body_string(response: axum::response::Response) -> Result<String> {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    pub fn chat_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }
}

use test_helpers::*;

/// In-process provider: records every request and replays a fixed script.
struct ScriptedProvider {
    script: Vec<Result<String, String>>,
    reject: bool,
    seen: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    fn new(script: Vec<Result<String, String>>) -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider {
            script,
            reject: false,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn rejecting() -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider {
            script: Vec::new(),
            reject: true,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<CompletionRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn stream_chat(&self, request: CompletionRequest) -> Result<FragmentStream, RelayError> {
        self.seen.lock().unwrap().push(request);
        if self.reject {
            return Err(RelayError::Provider("model not available".into()));
        }
        let items: Vec<Result<String, RelayError>> = self
            .script
            .iter()
            .map(|step| step.clone().map_err(RelayError::Provider))
            .collect();
        Ok(Box::pin(stream::iter(items)))
    }
}

fn app(search_url: String, provider: Arc<ScriptedProvider>) -> (Router, Arc<SearchClient>) {
    app_with(search_url, provider, |service| service)
}

fn app_with(
    search_url: String,
    provider: Arc<ScriptedProvider>,
    configure: impl FnOnce(ChatService) -> ChatService,
) -> (Router, Arc<SearchClient>) {
    let search = Arc::new(SearchClient::new(search_url));
    let service = Arc::new(configure(ChatService::new(search.clone(), provider)));
    (create_router(service, CorsLayer::permissive()), search)
}

#[tokio::test]
async fn health_reports_healthy() -> Result<()> {
    let (router, _) = app("http://127.0.0.1:9/html/".into(), ScriptedProvider::new(vec![]));
    let response = router
        .oneshot(Request::builder().uri("/").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await?, r#"{"status":"healthy"}"#);
    Ok(())
}

#[tokio::test]
async fn plain_message_skips_search() -> Result<()> {
    let hits = Arc::new(AtomicUsize::new(0));
    let engine = france_engine(hits.clone()).await?;
    let provider = ScriptedProvider::new(vec![
        Ok("Recursion".into()),
        Ok(" is".into()),
        Ok(" is".into()),
        Ok(" a function calling itself.".into()),
    ]);
    let (router, search) = app(format!("http://{engine}/html/"), provider.clone());

    let response = router
        .oneshot(chat_request(serde_json::json!({"message": "Explain recursion"})))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .starts_with("text/event-stream")
    );
    let body = body_string(response).await?;
    assert_eq!(
        body,
        "data: {\"content\":\"Recursion\"}\n\n\
         data: {\"content\":\" is\"}\n\n\
         data: {\"content\":\" a function calling itself.\"}\n\n"
    );

    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(!search.has_session().await);
    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].system, FORMATTING_PROMPT);
    assert_eq!(requests[0].user, "Explain recursion");
    assert_eq!(requests[0].model, "gpt-4o-mini");
    assert_eq!(requests[0].max_tokens, 700);
    Ok(())
}

#[tokio::test]
async fn search_message_augments_system_prompt() -> Result<()> {
    let hits = Arc::new(AtomicUsize::new(0));
    let engine = france_engine(hits.clone()).await?;
    let provider = ScriptedProvider::new(vec![Ok("About 68 million.".into())]);
    let (router, _) = app(format!("http://{engine}/html/"), provider.clone());

    let response = router
        .oneshot(chat_request(serde_json::json!({
            "message": "[SEARCH] current population of France",
            "model": "o3-mini",
        })))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_string(response).await?,
        "data: {\"content\":\"About 68 million.\"}\n\n"
    );

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(request.system.contains("France Demographics"));
    assert!(request.system.contains("current population of France"));
    assert!(request.system.contains("France has about 68 million inhabitants."));
    assert_eq!(request.user, "current population of France");
    assert_eq!(request.model, "o3-mini-2025-01-31");
    assert_eq!(request.max_tokens, 1000);
    Ok(())
}

#[tokio::test]
async fn failed_search_still_answers() -> Result<()> {
    let hits = Arc::new(AtomicUsize::new(0));
    let engine = failing_engine(hits.clone()).await?;
    let provider = ScriptedProvider::new(vec![Ok("I could not find results.".into())]);
    let (router, _) = app(format!("http://{engine}/html/"), provider.clone());

    let response = router
        .oneshot(chat_request(serde_json::json!({"message": "[SEARCH]   obscure topic"})))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_string(response).await?,
        "data: {\"content\":\"I could not find results.\"}\n\n"
    );
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let requests = provider.requests();
    assert!(requests[0].system.contains(NO_RESULTS));
    assert_eq!(requests[0].user, "obscure topic");
    Ok(())
}

#[tokio::test]
async fn mid_stream_failure_becomes_error_event() -> Result<()> {
    let provider = ScriptedProvider::new(vec![
        Ok("one".into()),
        Ok("two".into()),
        Err("stream reset".into()),
        Ok("three".into()),
    ]);
    let (router, _) = app("http://127.0.0.1:9/html/".into(), provider);

    let response = router
        .oneshot(chat_request(serde_json::json!({"message": "hi"})))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_string(response).await?,
        "data: {\"content\":\"one\"}\n\n\
         data: {\"content\":\"two\"}\n\n\
         data: {\"error\":\"provider error: stream reset\"}\n\n"
    );
    Ok(())
}

#[tokio::test]
async fn provider_rejection_is_a_request_failure() -> Result<()> {
    let (router, _) = app("http://127.0.0.1:9/html/".into(), ScriptedProvider::rejecting());
    let response = router
        .oneshot(chat_request(serde_json::json!({"message": "hi"})))
        .await?;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await?)?;
    assert_eq!(body["detail"], "provider error: model not available");
    Ok(())
}

#[tokio::test]
async fn blank_message_is_rejected() -> Result<()> {
    let provider = ScriptedProvider::new(vec![]);
    let (router, _) = app("http://127.0.0.1:9/html/".into(), provider.clone());
    let response = router
        .oneshot(chat_request(serde_json::json!({"message": "   "})))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(provider.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn search_prefix_without_query_is_rejected() -> Result<()> {
    let hits = Arc::new(AtomicUsize::new(0));
    let engine = france_engine(hits.clone()).await?;
    let provider = ScriptedProvider::new(vec![Ok("unused".into())]);

    for message in ["[SEARCH]", "[SEARCH]   "] {
        let (router, _) = app(format!("http://{engine}/html/"), provider.clone());
        let response = router
            .oneshot(chat_request(serde_json::json!({"message": message})))
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await?)?;
        assert_eq!(body["detail"], "Message cannot be empty");
    }

    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(provider.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn malformed_chat_body_is_a_bad_request() -> Result<()> {
    let provider = ScriptedProvider::new(vec![]);

    let (router, _) = app("http://127.0.0.1:9/html/".into(), provider.clone());
    let response = router
        .oneshot(chat_request(serde_json::json!({"model": "gpt-4o-mini"})))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await?)?;
    assert!(body["detail"].as_str().unwrap().contains("message"));

    let (router, _) = app("http://127.0.0.1:9/html/".into(), provider.clone());
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await?)?;
    assert!(body["detail"].is_string());

    assert!(provider.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn composer_and_result_limit_shape_the_search_prompt() -> Result<()> {
    let pages = Router::new()
        .route(
            "/france",
            get(|| async {
                Html("<html><body><main>France has about 68 million inhabitants.</main></body></html>")
            }),
        )
        .route(
            "/germany",
            get(|| async { Html("<html><body><main>Germany has 84 million.</main></body></html>") }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let results = format!(
        r#"<html><body>
             <div class="links_main"><a class="result__a" href="http://{addr}/france">France</a></div>
             <div class="links_main"><a class="result__a" href="http://{addr}/germany">Germany</a></div>
           </body></html>"#
    );
    let pages = pages.route(
        "/html/",
        post(move || {
            let results = results.clone();
            async move { Html(results) }
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, pages).await.unwrap();
    });

    let provider = ScriptedProvider::new(vec![Ok("ok".into())]);
    let (router, _) = app_with(format!("http://{addr}/html/"), provider.clone(), |service| {
        service
            .with_composer(ContextComposer::with_per_result_chars(10))
            .with_max_results(1)
    });
    let response = router
        .oneshot(chat_request(serde_json::json!({"message": "[SEARCH] population"})))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    body_string(response).await?;

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    let system = &requests[0].system;
    assert!(system.contains(&format!("Source: [France](http://{addr}/france)\nFrance has\n")));
    assert!(!system.contains("France has about"));
    assert!(!system.contains("Germany"));
    Ok(())
}

#[tokio::test]
async fn test_search_returns_results() -> Result<()> {
    let hits = Arc::new(AtomicUsize::new(0));
    let engine = france_engine(hits).await?;
    let (router, _) = app(format!("http://{engine}/html/"), ScriptedProvider::new(vec![]));

    let response = router
        .oneshot(
            Request::builder()
                .uri("/test-search?query=population%20of%20France")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await?)?;
    assert_eq!(body["status"], "success");
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["title"], "France Demographics");
    assert_eq!(results[0]["content"], "France has about 68 million inhabitants.");
    assert_eq!(results[0]["snippet"], "Population statistics for France.");
    assert_eq!(results[0]["error"], false);
    Ok(())
}

#[tokio::test]
async fn test_search_reports_engine_failure() -> Result<()> {
    let engine = failing_engine(Arc::new(AtomicUsize::new(0))).await?;
    let (router, _) = app(format!("http://{engine}/html/"), ScriptedProvider::new(vec![]));

    let response = router
        .oneshot(
            Request::builder()
                .uri("/test-search?query=anything")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await?)?;
    assert!(body["detail"].as_str().unwrap().contains("502"));
    Ok(())
}

#[tokio::test]
async fn test_search_requires_query() -> Result<()> {
    let (router, _) = app("http://127.0.0.1:9/html/".into(), ScriptedProvider::new(vec![]));
    let response = router
        .oneshot(Request::builder().uri("/test-search").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}
