use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use qy_core::{Error, Result};
use qy_engine::{FileConnector, HttpReasoningClient, QueryService, Summarizer, Translator};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod boundary;
mod config;

use api::AppState;
use config::Config;

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(
    name = "qy-hub",
    version = "0.1.0",
    about = "QUARRY natural-language query hub"
)]
struct Args {
    /// Server bind address (overrides [server] bind)
    #[arg(long)]
    bind: Option<String>,

    /// Path to config file
    #[arg(long, default_value = "quarry.toml")]
    config: PathBuf,

    /// Collection data file, JSON array or NDJSON (overrides [store] path)
    #[arg(long)]
    data: Option<PathBuf>,
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(api::health))
        .route("/api/query", post(api::ask))
        .route("/api/query/generate", post(api::generate))
        .route("/api/query/raw", post(api::raw))
        .route("/api/sample", get(api::sample))
        .route("/api/stats", get(api::stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "qy_hub=info,qy_engine=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(Args::parse()).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = Config::load(&args.config)?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(data) = args.data {
        config.store.path = data;
    }

    let schema = config.schema()?;
    let reasoning = Arc::new(HttpReasoningClient::from_config(&config.reasoning)?);
    let connector = Arc::new(FileConnector::new(
        config.store.path.clone(),
        config.store.collection.clone(),
    ));
    let service = Arc::new(QueryService::new(
        connector,
        Translator::new(reasoning.clone(), &schema),
        Summarizer::new(reasoning.clone()),
    ));

    // Connect in the background; requests await the same initialization.
    let warmup = service.clone();
    tokio::spawn(async move {
        if let Err(e) = warmup.connect().await {
            tracing::warn!("Initial store connection failed: {}", e);
        }
    });

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .map_err(|e| Error::Config(format!("invalid bind address '{}': {}", config.server.bind, e)))?;

    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("  QUARRY v0.1.0");
    tracing::info!("  API:        http://{}/api/health", addr);
    tracing::info!("  Data:       {}", config.store.path.display());
    tracing::info!("  Collection: {}", config.store.collection);
    tracing::info!("  Model:      {} @ {}", reasoning.model(), config.reasoning.base_url);
    tracing::info!("  Attempts:   {}", config.query.max_attempts);
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let state = Arc::new(AppState {
        service: service.clone(),
        config,
        start_time: Instant::now(),
        started_at: chrono::Utc::now(),
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    service.disconnect().await
}
