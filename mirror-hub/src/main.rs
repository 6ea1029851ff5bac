use anyhow::{Context, Result};
use axum::serve;
use clap::Parser;
use mirror_hub::{api, config::ServiceConfig};
use mirror_hub_core::{FileMirrorStore, HttpRemote, MirrorHub, OfflineRemote, RemoteStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServiceConfig::parse();
    let engine = config.engine();

    let store = Arc::new(
        FileMirrorStore::open(&config.data_dir)
            .with_context(|| format!("opening mirror store at {}", config.data_dir.display()))?,
    );
    let remote: Arc<dyn RemoteStore> = match &config.remote_url {
        Some(url) => Arc::new(HttpRemote::new(url.as_str(), engine.remote_timeout())?),
        None => {
            warn!("no remote configured, running offline");
            Arc::new(OfflineRemote)
        }
    };

    let hub = Arc::new(MirrorHub::new(store, remote, engine));
    if config.no_initial_pull {
        hub.spawn_sweep();
    } else if let Some(report) = hub.start().await {
        info!(mirrors = report.pulled.len(), "local mirrors refreshed from remote");
    }

    let app = api::create_router(hub.clone());
    let listener = TcpListener::bind(config.addr).await?;
    info!("Listening on {}", config.addr);
    serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    hub.shutdown().await;
    Ok(())
}
