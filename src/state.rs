use std::sync::Arc;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::AppConfig;
use crate::queue::{QueueClient, SqsQueue};
use crate::storage::{load_aws_config, S3Storage, StorageClient};

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn StorageClient>,
    pub queue: Arc<dyn QueueClient>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        let aws = load_aws_config(&config.storage).await;
        let storage = Arc::new(S3Storage::new(&aws, &config.storage)) as Arc<dyn StorageClient>;
        let queue = Arc::new(SqsQueue::new(&aws, &config.queue)) as Arc<dyn QueueClient>;

        Ok(Self::from_parts(db, config, storage, queue))
    }

    pub fn from_parts(
        db: PgPool,
        config: Arc<AppConfig>,
        storage: Arc<dyn StorageClient>,
        queue: Arc<dyn QueueClient>,
    ) -> Self {
        Self {
            db,
            config,
            storage,
            queue,
        }
    }
}

#[cfg(test)]
pub use fakes::{seed_user, MemoryQueue, MemoryStorage};
