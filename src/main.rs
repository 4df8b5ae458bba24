//! Crossview - cross-tenant mirroring and reconciliation engine

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crossview::{
    access::AccessIndex,
    config::{Args, Command},
    db::{DocumentStore, MongoStore},
    directory::TenantDirectory,
    repair::Repairs,
    sync::MirrorSyncEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("crossview={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Crossview - mirror reconciliation");
    info!("======================================");
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Database: {}", args.mongodb_db);
    info!("======================================");

    let mongo = match MongoStore::connect(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(store) => store,
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = mongo.ensure_indexes().await {
        error!("Index bootstrap failed: {}", e);
        std::process::exit(1);
    }

    let store: Arc<dyn DocumentStore> = Arc::new(mongo);
    let directory = Arc::new(TenantDirectory::new(Arc::clone(&store)));
    let access = AccessIndex::new(Arc::clone(&store));
    let repairs = Repairs::new(Arc::clone(&store), Arc::clone(&directory), access);

    match &args.command {
        Command::RoleRepair { dry_run } => {
            let report = repairs.run_role_repair(*dry_run).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::PointerRepair { dry_run } => {
            let report = repairs.run_context_pointer_repair(*dry_run).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::LinkRepair { dry_run } => {
            let report = repairs.run_link_repair(*dry_run).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Backfill { tenant, tag } => {
            let engine = MirrorSyncEngine::new(Arc::clone(&store), Arc::clone(&directory));
            let report = engine.backfill_classification(tenant, tag).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
