use std::sync::Arc;

use leadsync_core::config::AppConfig;
use leadsync_db::{connect_with_settings, migrations, DbPool, Repositories};
use leadsync_reconcile::{
    CrmApi, CrmClientError, CrmClientSettings, HttpCrmClient, ReconcileSettings,
    ReconciliationEngine,
};
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: Arc<ReconciliationEngine>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("crm client could not be built: {0}")]
    CrmClient(#[from] CrmClientError),
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

    let crm = HttpCrmClient::new(CrmClientSettings::from(&config.crm))?;
    if !crm.is_enabled() {
        warn!(
            event_name = "system.bootstrap.crm_disabled",
            correlation_id = "bootstrap",
            "crm api token is not configured; enrichment calls are skipped"
        );
    }

    let engine = ReconciliationEngine::new(
        Repositories::sql(db_pool.clone()),
        Arc::new(crm),
        ReconcileSettings::from(&config),
    );

    Ok(Application { config, db_pool, engine: Arc::new(engine) })
}
