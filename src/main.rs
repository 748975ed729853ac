use batch_registry::{
    api::Server,
    config::{Config, StorageBackend},
    registry::{BatchRegistry, SEED_BATCH_ID},
    state::{InMemoryWorldState, SqliteWorldState, WorldState},
};
use tracing::info;

/// The main entry point for the registry service.
///
/// Initializes logging, loads the configuration (path from the first
/// argument, `config/default.toml` otherwise), opens the configured world
/// state and serves the JSON-RPC API.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/default.toml".to_string());
    let config = Config::load(&path)?;
    info!("Batch registry starting with config: {:?}", config);

    match config.database.backend {
        StorageBackend::Memory => run(config, InMemoryWorldState::new()).await,
        StorageBackend::Sqlite => {
            let state = SqliteWorldState::connect(&config.database.url).await?;
            run(config, state).await
        }
    }
}

async fn run<S: WorldState>(config: Config, state: S) -> anyhow::Result<()> {
    let registry = BatchRegistry::new(state);

    // Genesis seeding only; an existing ledger keeps its record
    if config.ledger.initialize_on_start && !registry.batch_exists(SEED_BATCH_ID).await? {
        registry.init_ledger().await?;
    }

    let server = Server::new(config.api, registry);
    server.start().await?;

    Ok(())
}
