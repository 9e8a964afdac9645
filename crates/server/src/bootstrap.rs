use std::sync::Arc;

use carepath_agent::llm::build_client;
use carepath_agent::runtime::{Repositories, TurnEngine};
use carepath_core::audit::{AuditEvent, AuditSink};
use carepath_core::config::{AppConfig, ConfigError, LoadOptions};
use carepath_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<TurnEngine>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("turn engine setup failed: {0}")]
    Engine(String),
}

/// Writes audit events to the tracing pipeline under their own target.
struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        info!(
            target: "carepath::audit",
            event_name = "audit.event",
            audit_type = %event.event_type,
            category = ?event.category,
            outcome = ?event.outcome,
            correlation_id = %event.correlation_id,
            episode_id = event.episode_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown"),
            interaction_id = event.interaction_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown"),
            metadata = ?event.metadata,
            "audit"
        );
    }
}

#[allow(dead_code)]
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    bootstrap_with_config(AppConfig::load(options)?).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let client = build_client(&config.llm).map_err(|error| BootstrapError::Engine(error.to_string()))?;
    let engine = TurnEngine::build(
        &config,
        &Repositories::sql(db_pool.clone()),
        client,
        Arc::new(TracingAuditSink),
    )
    .map_err(|error| BootstrapError::Engine(error.to_string()))?;
    info!(
        event_name = "system.bootstrap.engine_ready",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        "turn engine ready"
    );

    Ok(Application { config, db_pool, engine: Arc::new(engine) })
}
