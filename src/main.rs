//! Match Simulation Server - live best-of-N league matches
//!
//! This is the main entry point. It wires up:
//! - The scheduler that promotes due matches
//! - The tick driver that simulates every running match
//! - WebSocket streams for spectators
//! - HTTP endpoints for scheduling, rosters and termination
//! - Supabase persistence and the settlement webhook

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use match_sim_server::app::AppState;
use match_sim_server::config::Config;
use match_sim_server::engine::{Engine, EngineSettings};
use match_sim_server::http::build_router;
use match_sim_server::settlement::{LogSink, SettlementQueue, SettlementSink, WebhookSink};
use match_sim_server::store::{
    MatchStore, MemoryRosterDirectory, MemoryStore, RosterDirectory, SupabaseClient,
    SupabaseRosterDirectory, SupabaseStore,
};
use match_sim_server::util::time::{init_server_time, IntervalTicker, SystemClock};
use match_sim_server::ws::Hub;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Match Simulation Server");
    info!("Server address: {}", config.server_addr);

    // Persistence backend
    let (store, rosters): (Arc<dyn MatchStore>, Arc<dyn RosterDirectory>) =
        match &config.supabase {
            Some(supabase) => {
                info!(url = %supabase.url, "Using Supabase persistence");
                let client = SupabaseClient::new(&supabase.url, &supabase.service_role_key);
                let store: Arc<dyn MatchStore> = Arc::new(SupabaseStore::new(client.clone()));
                let rosters: Arc<dyn RosterDirectory> =
                    Arc::new(SupabaseRosterDirectory::new(client));
                (store, rosters)
            }
            None => {
                warn!("SUPABASE_URL not set, matches are kept in memory only");
                let store: Arc<dyn MatchStore> = Arc::new(MemoryStore::new());
                let rosters: Arc<dyn RosterDirectory> = Arc::new(MemoryRosterDirectory::new());
                (store, rosters)
            }
        };

    // Settlement delivery
    let sink: Arc<dyn SettlementSink> = match &config.settlement_webhook {
        Some(webhook) => {
            info!(url = %webhook.url, "Settlement webhook enabled");
            Arc::new(WebhookSink::new(webhook.url.clone(), webhook.secret.clone()))
        }
        None => Arc::new(LogSink),
    };
    let (settlement, settlement_worker) = SettlementQueue::spawn(sink);

    // Engine
    let hub = Arc::new(Hub::new());
    let settings = EngineSettings::from(&config);
    let engine = Arc::new(Engine::new(
        store.clone(),
        rosters.clone(),
        hub.clone(),
        Arc::new(settlement),
        Arc::new(SystemClock),
        settings.clone(),
    ));

    match engine.scheduler().recover().await {
        Ok(recovered) if !recovered.is_empty() => {
            info!(count = recovered.len(), "Recovered running matches");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Recovery scan failed, continuing"),
    }

    let driver = engine.driver().clone();
    let tick_interval = settings.tick_interval;
    let driver_handle = tokio::spawn(async move {
        driver.run(IntervalTicker::new(tick_interval)).await;
    });

    let scheduler = engine.scheduler().clone();
    let scheduler_interval = settings.scheduler_interval;
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(IntervalTicker::new(scheduler_interval)).await;
    });

    // Build router
    let state = AppState::new(config.clone(), engine.clone(), hub, store, rosters);
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Spectator endpoint: ws://{}/matches/:id/live", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the loops, then let in-flight finalizations land
    scheduler_handle.abort();
    driver_handle.abort();
    let _ = scheduler_handle.await;
    let _ = driver_handle.await;
    engine.driver().flush().await;
    drop(engine);
    if tokio::time::timeout(std::time::Duration::from_secs(5), settlement_worker)
        .await
        .is_err()
    {
        warn!("Settlement queue did not drain before shutdown");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
