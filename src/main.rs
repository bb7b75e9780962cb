//! Survey Board Back binary entrypoint wiring REST, SSE and the selected document store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use survey_board_back::{
    build_router,
    config::{AppConfig, StorageBackend},
    dao::{
        doc_store::{DocumentStore, memory::MemoryStore},
        storage::StorageError,
    },
    services::{sse_events, storage_supervisor},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let backend = StorageBackend::from_env();
    let app_state = AppState::new(config);

    sse_events::spawn_broadcaster(app_state.clone());
    spawn_storage(app_state.clone(), backend);

    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, ?backend, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Start the supervisor for the selected backend; the server stays degraded until it connects.
fn spawn_storage(state: SharedState, backend: StorageBackend) {
    match backend {
        StorageBackend::Memory => {
            let store = MemoryStore::new();
            tokio::spawn(storage_supervisor::run(state, move || {
                let store = store.clone();
                async move { Ok(Arc::new(store) as Arc<dyn DocumentStore>) }
            }));
        }
        #[cfg(feature = "couch-store")]
        StorageBackend::Couch => {
            use survey_board_back::dao::doc_store::couchdb::{CouchConfig, CouchStore};

            let config = match CouchConfig::from_env() {
                Ok(config) => config,
                Err(err) => {
                    warn!(error = %err, "invalid CouchDB configuration; staying degraded");
                    return;
                }
            };
            tokio::spawn(storage_supervisor::run(state, move || {
                let config = config.clone();
                async move {
                    let store = CouchStore::connect(config).await?;
                    Ok::<_, StorageError>(Arc::new(store) as Arc<dyn DocumentStore>)
                }
            }));
        }
        #[cfg(feature = "mongo-store")]
        StorageBackend::Mongo => {
            use survey_board_back::dao::doc_store::mongodb::{MongoConfig, MongoStore};

            tokio::spawn(storage_supervisor::run(state, || async {
                let config = MongoConfig::from_env().await?;
                let store = MongoStore::connect(config).await?;
                Ok::<_, StorageError>(Arc::new(store) as Arc<dyn DocumentStore>)
            }));
        }
    }
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "cannot install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
