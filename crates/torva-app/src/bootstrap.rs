//! Boot sequence: store → engine → background tasks → API listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use torva_api::{ApiServer, ApiState, AuthService};
use torva_core::swarm::SwarmClient;
use torva_data::Store;
use torva_engine::{EngineConfig, SwarmEngine, reducer, reloader, sweeper, updater};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::seed::seed_demo_accounts;
use crate::telemetry;

const DB_CONNECT_ATTEMPTS: u32 = 5;
const DB_CONNECT_BACKOFF: Duration = Duration::from_secs(3);

/// Boot the service and block until a shutdown signal.
///
/// # Errors
///
/// Returns an error on fatal initialisation failure: database unreachable
/// after retries, engine construction failure, or a missing production JWT
/// secret.
pub async fn run_app() -> AppResult<()> {
    telemetry::init_logging();
    let config = Config::from_env()?;
    info!(environment = %config.environment, "starting torva");
    if let Some(redis) = &config.redis_url {
        info!(url = %redis, "session cache configured");
    }

    let store = connect_store(&config).await?;
    store
        .migrate()
        .await
        .map_err(|source| AppError::MigrationFailed { source })?;
    info!("database migrations completed");

    let engine_config = EngineConfig {
        download_dir: config.download_dir.clone(),
        listen_port: config.torrent_port,
        max_concurrent_hint: config.max_concurrent,
        ..EngineConfig::default()
    };
    let client = build_swarm_client(&engine_config).await?;
    let (engine, update_rx) =
        SwarmEngine::new(client, engine_config).map_err(|source| AppError::EngineInit { source })?;
    info!("swarm engine initialised");

    let reducer_task = reducer::spawn_reducer(store.clone(), config.download_dir.clone(), update_rx);
    let updater_task = updater::spawn_updater(Arc::clone(&engine));

    seed_demo_accounts(&store).await;

    match reloader::reload_torrents(&store, &engine).await {
        Ok(_) => {}
        Err(err) => warn!(error = %err, "failed to reload torrents from store"),
    }

    let sweeper_task = sweeper::spawn_sweeper(store.clone(), Arc::clone(&engine));

    let auth = AuthService::new(
        &config.jwt_secret,
        config.jwt_access_expiry_minutes,
        config.jwt_refresh_expiry_days,
    );
    let state = ApiState::new(store, engine, auth);
    let limiter_task = state.limiter.spawn_cleanup();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let server = ApiServer::new(state);
    let result = server
        .serve(addr, shutdown_signal())
        .await
        .map_err(|source| AppError::ApiServer { source });

    for task in [reducer_task, updater_task, sweeper_task, limiter_task] {
        abort_task(task);
    }

    result?;
    info!("shutdown complete");
    Ok(())
}

async fn connect_store(config: &Config) -> AppResult<Store> {
    let mut last_error = None;
    for attempt in 1..=DB_CONNECT_ATTEMPTS {
        match Store::connect(&config.database_url).await {
            Ok(store) => return Ok(store),
            Err(err) => {
                warn!(error = %err, attempt, "database connection failed");
                last_error = Some(err);
                if attempt < DB_CONNECT_ATTEMPTS {
                    tokio::time::sleep(DB_CONNECT_BACKOFF).await;
                }
            }
        }
    }
    Err(AppError::DatabaseUnreachable {
        attempts: DB_CONNECT_ATTEMPTS,
        source: last_error.expect("at least one attempt was made"),
    })
}

#[cfg(feature = "rqbit")]
async fn build_swarm_client(config: &EngineConfig) -> AppResult<Arc<dyn SwarmClient>> {
    let client = torva_engine::session::rqbit::RqbitSwarm::new(config)
        .await
        .map_err(|source| AppError::EngineInit { source })?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "rqbit"))]
async fn build_swarm_client(_config: &EngineConfig) -> AppResult<Arc<dyn SwarmClient>> {
    warn!("no native swarm engine compiled in; torrent admissions will fail (enable the `rqbit` feature)");
    Ok(Arc::new(torva_engine::DisabledSwarm))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
}

fn abort_task(task: JoinHandle<()>) {
    if !task.is_finished() {
        task.abort();
    }
}
