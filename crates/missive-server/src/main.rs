use anyhow::Context;
use clap::Parser;
use missive_server::api::{self, AppState};
use missive_server::config::{CliArgs, ServerConfig};
use missive_server::connection::{ConnectionSupervisor, IdAllocationClient};
use missive_server::pagination::PaginationEngine;
use missive_server::store::{InMemoryMessageStore, MessageStore, PgMessageStore};
use missive_server::telemetry::init_telemetry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry(config.log_format)?;

    if cfg!(debug_assertions) {
        tracing::info!("Starting message service with full config: {:#?}", config);
    }

    let store: Arc<dyn MessageStore> = match &config.database {
        Some(db) => {
            tracing::info!("Connecting to PostgreSQL...");
            let store = PgMessageStore::connect(&db.url, db.max_connections)
                .await
                .context("failed to connect to PostgreSQL")?;
            if db.ensure_schema {
                store
                    .ensure_schema()
                    .await
                    .context("failed to create the messages schema")?;
            }
            tracing::info!("Connected to PostgreSQL");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, keeping messages in memory");
            Arc::new(InMemoryMessageStore::new())
        }
    };

    let mut state = AppState::new(PaginationEngine::new(store));

    if let Some(allocator) = config.allocator {
        let supervisor = ConnectionSupervisor::connect(allocator.supervisor)?;
        let settled = supervisor.wait_settled().await;
        if !settled.is_ready() {
            anyhow::bail!(
                "allocator connection `{}` ended in {settled}",
                supervisor.label()
            );
        }
        state = state
            .with_allocator(IdAllocationClient::new(supervisor).with_debug(allocator.debug));
    } else {
        tracing::warn!("ALLOCATOR_ENDPOINT not set, message creation is disabled");
    }

    let supervisors = Arc::clone(&state.supervisors);
    let app = api::router(state);

    let listener = TcpListener::bind(config.server_addr).await?;
    tracing::info!("Starting message service on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop accepting allocations before exporters flush.
    for supervisor in supervisors.iter() {
        supervisor.disconnect();
    }
    providers.shutdown();

    tracing::info!("Service shut down successfully");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
}
