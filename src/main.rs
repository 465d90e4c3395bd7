use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;

use relay::api;
use relay::chat::ChatService;
use relay::config::Config;
use relay::relay::OpenAiProvider;
use relay::search::SearchClient;

#[derive(Parser, Debug)]
#[command(version, about = "Streams chat completions, optionally augmented with live web search")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    #[arg(long, short, default_value_t = 8000)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Also bridges the log crate into tracing, so log::info! etc. show up.
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(true)
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let search = Arc::new(
        SearchClient::new(&config.search_url).with_fetch_concurrency(config.fetch_concurrency),
    );
    let provider = Arc::new(OpenAiProvider::new(
        reqwest::Client::new(),
        &config.openai_base_url,
        &config.openai_api_key,
    ));
    let service = Arc::new(ChatService::new(search.clone(), provider));
    let app = api::create_router(service, api::cors_layer(&config.allowed_origin));

    let listener = TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", args.host, args.port))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    search.close().await;
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
    }
}
