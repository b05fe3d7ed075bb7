//! Fusion Resolver - drives configured EVM <-> Tezos swaps
//!
//! Connects to every configured chain, runs one coordinator per `[[swaps]]`
//! entry and serves health, status and metrics until shut down. With
//! `RESOLVER_SIMULATE=1` the chains are simulated in-process.

use anyhow::{Context, Result};
use ethers::signers::LocalWallet;
use fusion_resolver::api;
use fusion_resolver::chain::{GatewayRegistry, Role, SimulatedChain};
use fusion_resolver::config::Settings;
use fusion_resolver::coordination::{
    summarize, Clock, CoordinatorPolicy, ManualClock, ResolverEngine, SwapContext, SwapPlan,
    SystemClock,
};
use fusion_resolver::metrics::MetricsServer;
use fusion_resolver::state::{MemorySwapStore, StateManager, SwapStore};
use fusion_resolver::tx::{LocalOrderSigner, OrderSigner};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Fusion Resolver v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains and {} swaps",
        settings.enabled_chains().len(),
        settings.swaps.len()
    );
    let simulate = std::env::var("RESOLVER_SIMULATE").map_or(false, |v| v == "1");

    // Swap persistence
    let store: Arc<dyn SwapStore> = if settings.database.enabled {
        let state_manager = StateManager::new(&settings.database)
            .await
            .context("Failed to connect to database")?;
        state_manager.run_migrations().await?;
        info!("Database connection established");
        Arc::new(state_manager)
    } else {
        info!("Database disabled, keeping swap records in memory");
        Arc::new(MemorySwapStore::new())
    };

    // Chain gateways
    let (registry, clock) = if simulate {
        warn!("RESOLVER_SIMULATE=1: all chains are simulated in-process");
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(SystemClock.now()));
        (simulated_registry(&settings, clock.clone())?, clock)
    } else {
        let registry = GatewayRegistry::connect(&settings).await?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        (registry, clock)
    };
    let registry = Arc::new(registry);
    info!("Chain connections initialized: {:?}", registry.connected_chains());

    // Maker signer
    let wallet = match settings.wallet.evm_wallet(Role::Maker) {
        Ok(wallet) => wallet,
        Err(e) if simulate => {
            warn!("{}; signing simulated orders with a throwaway key", e);
            LocalWallet::new(&mut rand::thread_rng())
        }
        Err(e) => return Err(e.into()),
    };
    let signer: Arc<dyn OrderSigner> = Arc::new(LocalOrderSigner::new(wallet));

    // Resolve every swap before touching a chain
    let plans = settings
        .swaps
        .iter()
        .map(|request| SwapPlan::resolve(&settings, request, signer.address()))
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid swap request")?;

    let engine = ResolverEngine::new(SwapContext {
        registry: registry.clone(),
        signer,
        clock,
        store: store.clone(),
        policy: CoordinatorPolicy::from_config(&settings.resolver),
    });

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let store = store.clone();
        let registry = registry.clone();
        async move {
            if let Err(e) = api::run_server(config, store, registry).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Health check loop
    let health_handle = tokio::spawn({
        let registry = registry.clone();
        let store = store.clone();
        let interval = settings.resolver.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                for (chain_id, healthy) in registry.health_check().await {
                    if !healthy {
                        warn!("Chain {} health check failed", chain_id);
                    }
                }

                if !store.health_check().await {
                    warn!("Swap store health check failed");
                }
            }
        }
    });

    info!("Fusion Resolver is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    let run = engine.run(plans);
    tokio::pin!(run);
    tokio::select! {
        outcomes = &mut run => {
            let (safe, failed) = summarize(&outcomes);
            info!("All swaps finished: {} safe, {} failed", safe, failed);
            for outcome in outcomes.iter().filter(|o| !o.is_safe()) {
                if let Err(e) = &outcome.result {
                    error!("Swap {} failed: {}", outcome.swap_id, e);
                }
            }
            // Keep serving status until asked to stop
            shutdown_signal().await;
        }
        _ = shutdown_signal() => {
            engine.stop();
            // Lets the engine abort its coordinators
            run.await;
        }
    }

    info!("Shutdown signal received, stopping...");

    // Abort background tasks
    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Fusion Resolver stopped");
    Ok(())
}

/// One simulated chain per configured chain, serving both roles and events
fn simulated_registry(settings: &Settings, clock: Arc<dyn Clock>) -> Result<GatewayRegistry> {
    let registry = GatewayRegistry::new();
    for (name, chain_config) in settings.enabled_chains() {
        let descriptor = chain_config
            .descriptor()
            .with_context(|| format!("Invalid configuration for chain {}", name))?;
        let chain_id = descriptor.chain_id;
        let sim = Arc::new(SimulatedChain::new(descriptor, clock.clone()));
        registry.register(chain_id, Role::Maker, sim.clone());
        registry.register(chain_id, Role::Resolver, sim.clone());
        registry.register_feed(chain_id, sim);
    }
    Ok(registry)
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,fusion_resolver=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
