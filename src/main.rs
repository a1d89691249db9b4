use clap::Parser;
use r2d2::Pool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

mod config;
mod db;
mod frame;
mod generate;
mod llm;
mod schema;
mod sql;
mod util;
mod viz;
mod web;

use crate::config::{AppConfig, CliArgs};
use crate::db::executor::DuckDbExecutor;
use crate::db::pool::DuckDbConnectionManager;
use crate::llm::LlmManager;
use crate::schema::catalog::SchemaCatalog;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_tracing();

    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Load the schema catalog; if the metadata store is unreachable, fall
    // back to the built-in minimal catalog rather than refusing to start.
    info!("Loading schema catalog from {}", config.schema_store.store_dir);
    let catalog = match SchemaCatalog::load(Path::new(&config.schema_store.store_dir)) {
        Ok(catalog) => catalog,
        Err(e) => {
            warn!("{} - falling back to the built-in minimal schema", e);
            SchemaCatalog::fallback()
        }
    };
    info!(
        "Catalog ready: {} tables, {} allow-listed",
        catalog.len(),
        catalog.allowed_tables().len()
    );

    info!("Initializing DuckDB connection pool");
    let db_manager = DuckDbConnectionManager::new(config.database.connection_string.clone());
    let pool = Pool::builder()
        .max_size(config.database.pool_size as u32)
        .build(db_manager)?;

    let executor = Arc::new(DuckDbExecutor::new(
        pool,
        Duration::from_secs(config.database.execution_timeout_secs),
    ));

    // Initialize the LLM manager
    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = Arc::new(LlmManager::new(&config.llm)?);

    // Create application state
    let app_state = Arc::new(AppState::new(
        config.clone(),
        Arc::new(catalog),
        llm_manager,
        executor,
    ));

    // Start the web server
    info!(
        "Starting nl-mart server on {}:{}",
        config.web.host, config.web.port
    );
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(std::io::Error::other(e.to_string()).into());
        }
    }

    Ok(())
}
