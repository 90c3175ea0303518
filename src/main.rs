use axum::routing::{delete, get, post};
use axum::Router;
use tracing_subscriber::EnvFilter;

use rag_gateway::api;
use rag_gateway::config::Config;
use rag_gateway::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("Vector backend: {}", config.vector.base_url);
    tracing::info!(
        "LLM provider: {} ({})",
        config.llm.provider,
        if config.llm.enabled {
            config.llm.model.as_str()
        } else {
            "disabled"
        }
    );

    let state = AppState::new(config.clone())?;

    let app = Router::new()
        .route("/chat", post(api::chat::chat_stream))
        .route("/chat/sync", post(api::chat::chat_sync))
        .route("/provider/search", post(api::search::search))
        .route("/documents", get(api::documents::list_documents))
        .route("/documents/text", post(api::documents::ingest_text))
        .route("/documents/file", post(api::documents::ingest_file))
        .route("/documents/{id}", get(api::documents::get_document))
        .route("/documents/{id}", delete(api::documents::delete_document))
        .route("/media/{file}", get(api::documents::serve_media))
        .route("/health", get(api::health))
        .route("/config", get(api::get_config))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;
    Ok(())
}

async fn shutdown_signal(state: AppState) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutting down");
    state.shutdown();
}
