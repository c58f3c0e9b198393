//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::{DaemonConfig, SeedConfig, StorageConfig};
use crate::error::{DaemonError, DaemonResult};
use mixtape_consensus::postgres::PostgresConsensusStore;
use mixtape_consensus::{
    InMemoryConsensusStore, MemberId, MemberRole, SignatureConsensusEngine, TrackId,
};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Mixtape Daemon Server
pub struct Server {
    config: DaemonConfig,
    engine: Arc<SignatureConsensusEngine>,
}

impl Server {
    /// Connect the configured backend and build the engine over it.
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let engine = match &config.storage {
            StorageConfig::Memory => {
                let store = Arc::new(seeded_memory_store(&config.seed));
                tracing::info!(
                    tracks = config.seed.tracks.len(),
                    members = config.seed.members.len(),
                    "Using in-memory storage"
                );
                SignatureConsensusEngine::from_backend(store)
            }
            StorageConfig::Postgres {
                url,
                max_connections,
                connect_timeout_secs,
            } => {
                let store = PostgresConsensusStore::connect_with_options(
                    url,
                    *max_connections,
                    *connect_timeout_secs,
                )
                .await?;
                tracing::info!(max_connections, "Connected to PostgreSQL storage");
                SignatureConsensusEngine::from_backend(Arc::new(store))
            }
        };
        let engine = Arc::new(engine.with_config(config.consensus.clone()));

        Ok(Self { config, engine })
    }

    /// Run the server until a shutdown signal arrives
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;

        let state = AppState::new(self.engine.clone());
        let app = create_router(state, self.config.server.enable_cors);

        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Mixtape daemon listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("Mixtape daemon shut down");

        Ok(())
    }
}

/// In-memory backend populated from the `seed` section.
pub fn seeded_memory_store(seed: &SeedConfig) -> InMemoryConsensusStore {
    let store = InMemoryConsensusStore::new();
    for track in &seed.tracks {
        store.insert_track(TrackId::new(track.id.as_str()), track.signature);
    }
    for member in &seed.members {
        let role = if member.admin {
            MemberRole::Admin
        } else {
            MemberRole::Member
        };
        store.upsert_member(MemberId::new(member.id.as_str()), role);
    }
    store
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
