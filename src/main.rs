//! OrderEase - multi-tenant shop ordering service

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orderease::auth::JwtService;
use orderease::clock::SystemClock;
use orderease::config::{AppConfig, DatabaseDriver};
use orderease::services::{EventPublisher, LocalImageStore, Services};
use orderease::state::AppState;
use orderease::store::{memory::MemoryStore, postgres::PgStore, Store};
use orderease::{api, id, tasks};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    id::init(config.node_id);

    let store: Arc<dyn Store> = match config.database.driver {
        DatabaseDriver::Postgres => {
            let dsn = config.database.dsn.as_deref().context("DATABASE_DSN must be set")?;
            let store = PgStore::connect(dsn, config.database.log_level).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        DatabaseDriver::Memory => {
            tracing::warn!("using in-memory store; data is lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable; order events will only be logged");
                None
            }
        },
        None => None,
    };

    let services = Services::new(
        store,
        Arc::new(SystemClock),
        JwtService::new(&config.jwt.secret, config.jwt.expiration_secs),
        EventPublisher::new(nats),
        Arc::new(LocalImageStore::new(&config.upload_dir)),
    );
    if let Some((username, password)) = &config.bootstrap_admin {
        services.auth.ensure_operator(username, password).await?;
    }

    let state = AppState::new(services);
    let janitor = tasks::spawn_revoked_token_janitor(
        state.services.clone(),
        Duration::from_secs(config.purge_interval_secs),
    );
    let rotation = tasks::spawn_temp_token_rotation(
        state.services.clone(),
        Duration::from_secs(config.rotate_interval_secs),
    );

    let app = api::router(state, &config.server.base_path);
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    tracing::info!(addr = %config.bind_addr(), base_path = %config.server.base_path, "OrderEase listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    janitor.abort();
    rotation.abort();
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
