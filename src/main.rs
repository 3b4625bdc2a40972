//! Hivemind service entrypoint

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hivemind::config::Args;
use hivemind::db::MongoClient;
use hivemind::rounds::RoundEngine;
use hivemind::store::{GameStore, MemoryStore, MongoGameStore};
use hivemind::topology::{TopologyManager, TopologyService};
use hivemind::types::HivemindError;
use hivemind::{GameApi, GameDriver, PredictionIntake, WeightUpdateEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Hivemind");
    info!("  MongoDB: {}", args.mongodb_uri);
    info!("  Database: {}", args.mongodb_db);
    info!("  Game tick: {}s", args.game_tick_secs);
    info!("  Topology tick: {}s", args.topology_tick_secs);
    info!("  Learning rate: {}", args.learning_rate);
    info!("  Fan-out: {}", args.fan_out);

    if let Err(e) = args.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let store = open_store(&args).await?;
    let rules = args.rules();

    let topology = Arc::new(TopologyManager::new(Arc::clone(&store), rules.fan_out));
    let api = GameApi::new(Arc::clone(&store), Arc::clone(&topology), rules);

    // Make sure the output layer exists and the graph is well-formed
    // before any timer fires
    api.ensure_final_node().await?;
    match topology.reconcile().await {
        Ok(report) => info!(
            "Initial topology reconcile: {} added, {} removed",
            report.edges_added, report.edges_removed
        ),
        Err(e) => warn!("Initial topology reconcile failed: {}", e),
    }

    let topology_service = Arc::new(TopologyService::new(
        Arc::clone(&topology),
        Duration::from_secs(args.topology_tick_secs),
    ));
    Arc::clone(&topology_service).start().await;

    let driver = Arc::new(GameDriver::new(
        Arc::clone(&store),
        RoundEngine::new(Arc::clone(&store), rules),
        WeightUpdateEngine::new(Arc::clone(&store), rules),
        PredictionIntake::new(Arc::clone(&store)),
        Duration::from_secs(args.game_tick_secs),
    ));
    Arc::clone(&driver).start().await;

    info!("Hivemind is running; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    driver.stop().await;
    topology_service.stop().await;

    Ok(())
}

/// Open the MongoDB-backed store, falling back to the in-memory store in
/// dev mode when MongoDB is unreachable
async fn open_store(args: &Args) -> Result<Arc<dyn GameStore>, HivemindError> {
    match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            let store = MongoGameStore::new(&client).await?;
            Ok(Arc::new(store))
        }
        Err(e) if args.dev_mode => {
            warn!("MongoDB unavailable ({}); dev mode using in-memory store", e);
            Ok(Arc::new(MemoryStore::new()))
        }
        Err(e) => Err(e),
    }
}
