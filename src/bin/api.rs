use nebula_chat::{
    agent::ChatAgent,
    api::start_server,
    gemini::GeminiClient,
    memory::{postgres::PostgresBackend, HistoryConfig, HistoryManager, SessionStore, Summarizer},
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let gemini_api_key = std::env::var("GEMINI_API_KEY").unwrap_or_else(|_| {
        eprintln!("⚠️  GEMINI_API_KEY not set in .env");
        eprintln!("📌 Chat responses will fail until it is configured");
        String::new()
    });

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("🚀 Nebula Chat Backend - API Server");
    info!("📍 Port: {}", api_port);

    // Session store: Postgres when configured, in-memory otherwise.
    // Runtime database failures degrade to in-memory transparently.
    let database_url = std::env::var("POSTGRES_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok();

    let store = match database_url {
        Some(url) => match PostgresBackend::connect_lazy(&url) {
            Ok(backend) => Arc::new(SessionStore::with_primary(Arc::new(backend))),
            Err(e) => {
                warn!("Postgres backend unavailable, using in-memory store: {}", e);
                Arc::new(SessionStore::in_memory())
            }
        },
        None => {
            info!("Session store backend: in-memory");
            Arc::new(SessionStore::in_memory())
        }
    };

    // Create components
    let gemini = Arc::new(GeminiClient::new(gemini_api_key));
    let summarizer = Arc::new(Summarizer::new(gemini.clone()));
    let history_config = HistoryConfig::from_env();
    info!(
        "History bounds: max_turns={} keep_recent={}",
        history_config.max_turns, history_config.keep_recent
    );

    let history = Arc::new(HistoryManager::new(
        store.clone(),
        summarizer,
        history_config,
    ));
    let agent = Arc::new(ChatAgent::new(store.clone(), history, gemini));

    info!("✅ Chat agent initialized");
    info!("📡 Starting API server...");

    // Start API server
    start_server(agent, store, api_port).await?;

    Ok(())
}
