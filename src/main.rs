use std::sync::Arc;

use anyhow::Result;
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use qingping_tuya_bridge::{
    api::{self, AppState},
    config::Config,
    db::{MemoryStore, PgStore, Store},
    qingping::QingpingClient,
    tuya::TuyaClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; env vars may be set externally.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn Store> = match config.database_url.as_deref() {
        Some(url) => {
            let store = PgStore::connect(url).await?;
            info!("Database ready");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory store, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    if config.qingping_webhook_secret.is_none() {
        warn!("No webhook secret configured; every Qingping push will be rejected");
    }

    // Vendor clients own their token caches for the life of the process.
    let qingping = Arc::new(QingpingClient::new(&config)?);
    let tuya = Arc::new(TuyaClient::new(&config)?);

    let state = AppState::new(&config, store, qingping, tuya);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
