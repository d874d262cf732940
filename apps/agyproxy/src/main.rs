use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

mod cli;

use agyproxy_core::{
    Credential, CredentialPool, HttpUpstream, MemoryStore, OrchestratorConfig, ProxyOrchestrator,
    TokenLifecycleManager, UpstreamConfig,
};
use agyproxy_core::token::HttpTokenEndpoint;
use agyproxy_router::{router, AppState};

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("agyproxy failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let mode: agyproxy_common::Mode = cli.mode.into();

    let credentials = load_credentials(&cli.credentials)?;
    let total = credentials.len();
    let enabled = credentials.iter().filter(|cred| cred.enabled).count();
    info!(%mode, credentials_total = total, credentials_enabled = enabled, "pool ready");

    let store = Arc::new(MemoryStore::new(credentials));
    let pool = Arc::new(CredentialPool::new(store.clone()));
    let tokens = Arc::new(TokenLifecycleManager::with_stale_grace(
        store.clone(),
        Arc::new(HttpTokenEndpoint::new(cli.proxy.as_deref())?),
        time::Duration::minutes(cli.stale_grace_minutes),
    ));
    let upstream = Arc::new(HttpUpstream::new(UpstreamConfig {
        proxy: cli.proxy.clone(),
        ..UpstreamConfig::default()
    })?);
    let orchestrator = Arc::new(ProxyOrchestrator::new(
        store,
        pool,
        tokens,
        upstream,
        OrchestratorConfig {
            max_attempts: cli.max_attempts,
            fake_stream_delay: Duration::from_millis(cli.fake_stream_delay_ms),
            ..OrchestratorConfig::default()
        },
    ));

    let app = router(AppState { orchestrator, mode });
    let bind = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn load_credentials(path: &str) -> Result<Vec<Credential>, Box<dyn Error + Send + Sync>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| format!("cannot read credential file {path}: {err}"))?;
    let credentials: Vec<Credential> = serde_json::from_str(&raw)
        .map_err(|err| format!("cannot parse credential file {path}: {err}"))?;
    Ok(credentials)
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("agyproxy=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
