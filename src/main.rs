use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feastfit::config::{AppConfig, StoreConfig};
use feastfit::console;
use feastfit::recommend::HttpRecommendationService;
use feastfit::session::marker::FileMarker;
use feastfit::state::AppState;
use feastfit::store::{FirebaseStore, MemoryStore, RemoteGroupStore};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Logs go to stderr so they do not interleave with console output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feastfit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting FeastFit...");
    let config = AppConfig::from_env();

    let store: Arc<dyn RemoteGroupStore> = match &config.store {
        StoreConfig::Firebase { url, auth_token } => {
            match FirebaseStore::new(url.clone(), auth_token.clone(), config.request_timeout) {
                Ok(store) => {
                    tracing::info!("Using realtime database at {}", url);
                    Arc::new(store)
                }
                Err(e) => {
                    tracing::error!("Failed to set up realtime database: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        StoreConfig::Memory => {
            tracing::warn!(
                "FEASTFIT_DATABASE_URL not set. Groups are local to this process."
            );
            Arc::new(MemoryStore::new())
        }
    };

    let recommender = match HttpRecommendationService::new(
        config.analyze_url.clone(),
        config.request_timeout,
    ) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            tracing::error!("Failed to set up recommendation client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let marker = Arc::new(FileMarker::new(config.session_file.clone()));
    let state = Arc::new(AppState::new(store, marker, recommender, config.pick_delay));

    match state.session.resume().await {
        Ok(Some(group)) => println!("Resumed group {}", group),
        Ok(None) => {}
        Err(e) => println!("Error: {}", e),
    }

    if let Err(e) = console::run(state).await {
        tracing::error!("Console failed: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
