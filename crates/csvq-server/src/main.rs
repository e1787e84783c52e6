//! csvq-server: HTTP service for natural-language queries over uploaded
//! CSV files.
//!
//! Binds uploads to in-memory sessions and dispatches each query to the
//! plan/act orchestration loop in `csvq-agent`.

mod config;
mod registry;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use csvq_agent::{OpenAiClient, OpenAiConfig, Planner};

use crate::config::Config;
use crate::registry::SessionRegistry;
use crate::routes::{router, AppState};

#[derive(Parser)]
#[command(name = "csvq-server", about = "Natural-language queries over uploaded CSV files")]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = 8000)]
    port: u16,
}

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "csvq_server=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env();

    let planner_config =
        OpenAiConfig::from_env().expect("OPENAI_API_KEY must be set to start the server");
    let planner: Arc<dyn Planner> = Arc::new(OpenAiClient::new(planner_config));

    let registry = SessionRegistry::new(config.session_ttl);

    // Idle-session reaper.
    let reaper = registry.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SWEEP_INTERVAL).await;
            reaper.sweep().await;
            let sessions = reaper.count().await;
            tracing::debug!(sessions = sessions, "reaper tick");
        }
    });

    let state = Arc::new(AppState {
        registry,
        planner,
        config,
    });
    let app = router(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind TCP listener");
    tracing::info!("csvq-server listening on {}", addr);

    axum::serve(listener, app).await.expect("server error");
}
