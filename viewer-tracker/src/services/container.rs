//! Service container for dependency injection.
//!
//! Opens the database, builds the store, notification service, metadata
//! source and scheduler from an [`AppConfig`], and tears them down in order.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::Result;
use crate::config::AppConfig;
use crate::database::repositories::{SampleStore, SqlxSampleStore};
use crate::database::{self, DbPool, WritePool};
use crate::notification::NotificationService;
use crate::scheduler::{Scheduler, SchedulerDeps};
use crate::source::{MetadataSource, YtDlpSource};

/// Default shutdown timeout.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Service container holding all application services.
pub struct ServiceContainer {
    pub pool: DbPool,
    pub write_pool: WritePool,
    pub store: Arc<dyn SampleStore>,
    pub notifications: Arc<NotificationService>,
    pub scheduler: Scheduler,
}

impl ServiceContainer {
    /// Open the database, apply migrations and build the production services.
    pub async fn new(config: &AppConfig) -> Result<Self> {
        info!("Initializing service container");

        let pool = database::init_pool(&config.database_url).await?;
        let write_pool = database::init_write_pool(&config.database_url).await?;
        database::run_migrations(&pool).await?;

        let source: Arc<dyn MetadataSource> = Arc::new(YtDlpSource::new(config.source.clone()));
        let container = Self::with_source(config, pool, write_pool, source)?;

        info!("Service container initialized");
        Ok(container)
    }

    /// Build the services over existing pools with a caller-provided source.
    pub fn with_source(
        config: &AppConfig,
        pool: DbPool,
        write_pool: WritePool,
        source: Arc<dyn MetadataSource>,
    ) -> Result<Self> {
        config.tracker.validate()?;
        config.analyzer.validate()?;

        let store: Arc<dyn SampleStore> =
            Arc::new(SqlxSampleStore::new(pool.clone(), write_pool.clone()));
        let notifications = Arc::new(NotificationService::from_config(
            &config.notification,
            Arc::clone(&store),
        )?);

        let scheduler = Scheduler::new(SchedulerDeps {
            store: Arc::clone(&store),
            source,
            notifications: Arc::clone(&notifications),
            tracker: config.tracker.clone(),
            analyzer: config.analyzer.clone(),
        });

        Ok(Self {
            pool,
            write_pool,
            store,
            notifications,
            scheduler,
        })
    }

    /// Stop the scheduler and pending deliveries, then close the pools.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) {
        info!("Shutting down services (timeout: {:?})", timeout);
        self.scheduler.shutdown(timeout).await;

        info!("Closing database pools...");
        self.write_pool.close().await;
        self.pool.close().await;
        info!("Services shut down");
    }
}
