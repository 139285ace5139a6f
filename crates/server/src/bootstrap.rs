use std::sync::Arc;

use cadence_core::clock::SystemClock;
use cadence_core::config::{AppConfig, ConfigError, LoadOptions};
use cadence_db::repositories::{
    SqlActionQueueRepository, SqlCampaignRepository, SqlEventRepository,
    SqlInteractionRepository, SqlJourneyRepository, SqlLeadRepository, SqlNumberRepository,
    SqlPacingRepository, SqlPlaybookRepository, SqlSettingsRepository,
};
use cadence_db::{connect_with_settings, migrations, DbPool};
use cadence_providers::{HttpProviders, ProviderError};
use thiserror::Error;
use tracing::info;

use crate::engine::{Engine, EngineDeps};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<Engine>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("provider client construction failed: {0}")]
    Providers(#[source] ProviderError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let providers =
        Arc::new(HttpProviders::new(&config.providers).map_err(BootstrapError::Providers)?);

    let deps = EngineDeps {
        settings: Arc::new(SqlSettingsRepository::new(db_pool.clone())),
        leads: Arc::new(SqlLeadRepository::new(db_pool.clone())),
        interactions: Arc::new(SqlInteractionRepository::new(db_pool.clone())),
        journeys: Arc::new(SqlJourneyRepository::new(db_pool.clone())),
        playbooks: Arc::new(SqlPlaybookRepository::new(db_pool.clone())),
        queue: Arc::new(SqlActionQueueRepository::new(db_pool.clone())),
        events: Arc::new(SqlEventRepository::new(db_pool.clone())),
        pacing: Arc::new(SqlPacingRepository::new(db_pool.clone())),
        numbers: Arc::new(SqlNumberRepository::new(db_pool.clone())),
        campaigns: Arc::new(SqlCampaignRepository::new(db_pool.clone())),
        sms: providers.clone(),
        calls: providers.clone(),
        billing: providers,
        clock: Arc::new(SystemClock::new(config.engine.utc_offset_hours)),
    };
    let engine = Arc::new(Engine::new(deps, config.engine.clone()));

    info!(event_name = "system.bootstrap.engine_ready", "engine dependencies wired");

    Ok(Application { config, db_pool, engine })
}
