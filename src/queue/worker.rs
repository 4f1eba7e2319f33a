//! Polling consumer for template jobs.

use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use super::{ReceivedMessage, SourceKind, TemplateJob};
use crate::{
    config::AppConfig,
    projects::Project,
    state::AppState,
    storage::StorageClient,
    templates::{template_prefix, Template},
};

const MAX_BATCH: i32 = 10;
const LONG_POLL: Duration = Duration::from_secs(20);
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Location {
    bucket: String,
    prefix: String,
}

fn locate(config: &AppConfig, name: &str, kind: SourceKind) -> Location {
    match kind {
        SourceKind::Template => Location {
            bucket: config.storage.template_bucket.clone(),
            prefix: template_prefix(name),
        },
        SourceKind::Project => Location {
            bucket: config.bucket_name(name),
            prefix: String::new(),
        },
    }
}

/// Copies every file of the job's source into its destination. Returns the number of files.
pub async fn copy_files(
    storage: &dyn StorageClient,
    config: &AppConfig,
    job: &TemplateJob,
) -> anyhow::Result<usize> {
    let from = locate(config, &job.from_name, job.from_type);
    let to = locate(config, &job.to_name, job.to_type);
    let files = storage
        .get_files(&from.bucket, &from.prefix)
        .await
        .with_context(|| format!("list source {}/{}", from.bucket, from.prefix))?;
    let mut copied = 0;
    for file in files {
        let rel = file.key.strip_prefix(&from.prefix).unwrap_or(&file.key);
        if rel.is_empty() {
            continue;
        }
        let dst_key = format!("{}{}", to.prefix, rel);
        storage
            .copy_object(&from.bucket, &file.key, &to.bucket, &dst_key)
            .await?;
        copied += 1;
    }
    Ok(copied)
}

/// Whether the job's destination is still registered.
async fn destination_exists(state: &AppState, job: &TemplateJob) -> anyhow::Result<bool> {
    let found = match job.to_type {
        SourceKind::Project => Project::find_by_name(&state.db, &job.to_name).await?.is_some(),
        SourceKind::Template => Template::find_by_name(&state.db, &job.to_name).await?.is_some(),
    };
    Ok(found)
}

/// Handles one message. Malformed bodies and jobs for deleted destinations are
/// dropped; failed copies stay on the queue for redelivery.
#[instrument(skip(state, msg))]
pub async fn process_message(state: &AppState, msg: &ReceivedMessage) -> anyhow::Result<()> {
    let job = match TemplateJob::parse(&msg.body) {
        Ok(job) => job,
        Err(e) => {
            warn!(error = %e, body = %msg.body, "dropping malformed template job");
            return state.queue.delete(&msg.receipt).await;
        }
    };
    if !destination_exists(state, &job)
        .await
        .context("look up template job destination")?
    {
        warn!(to = %job.to_name, kind = %job.to_type, "destination gone, dropping template job");
        return state.queue.delete(&msg.receipt).await;
    }
    let copied = copy_files(state.storage.as_ref(), &state.config, &job).await?;
    info!(from = %job.from_name, to = %job.to_name, copied, "template job done");
    state.queue.delete(&msg.receipt).await
}

pub async fn run_worker(state: AppState, mut shutdown: watch::Receiver<bool>) {
    info!("queue worker started");
    loop {
        let batch = tokio::select! {
            _ = shutdown.changed() => break,
            batch = state.queue.receive(MAX_BATCH, LONG_POLL) => batch,
        };
        match batch {
            Ok(messages) => {
                for msg in &messages {
                    if let Err(e) = process_message(&state, msg).await {
                        error!(error = %format!("{e:#}"), "template job failed");
                    }
                }
            }
            Err(e) => {
                warn!(error = %format!("{e:#}"), "queue receive failed");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                }
            }
        }
    }
    info!("queue worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use sqlx::PgPool;

    use super::*;
    use crate::{
        queue::{enqueue_template_job, QueueClient},
        state::{seed_user, MemoryQueue, MemoryStorage},
        storage::FileUpload,
    };

    async fn seed_storage(state: &AppState, storage: &MemoryStorage) {
        let tpl = state.config.storage.template_bucket.clone();
        storage.create_bucket(&tpl).await.unwrap();
        for key in ["templates/landing/index.html", "templates/landing/css/site.css"] {
            storage
                .save_file(
                    &tpl,
                    FileUpload {
                        key: key.into(),
                        body: Bytes::from_static(b"x"),
                        content_type: "text/plain".into(),
                    },
                )
                .await
                .unwrap();
        }
    }

    /// Registers `landing` and the project `my-site`, without creating its bucket.
    async fn seed_rows(state: &AppState) {
        let owner = seed_user(&state.db, "jane").await;
        Template::create(&state.db, "landing", owner.id, None).await.unwrap();
        Project::create(
            &state.db,
            "my-site",
            owner.id,
            &state.config.bucket_name("my-site"),
            "s3",
        )
        .await
        .unwrap();
    }

    fn db_state(pool: PgPool) -> (AppState, Arc<MemoryStorage>, Arc<MemoryQueue>) {
        let storage = Arc::new(MemoryStorage::default());
        let queue = Arc::new(MemoryQueue::default());
        (AppState::with_db(pool, storage.clone(), queue.clone()), storage, queue)
    }

    fn landing_job() -> TemplateJob {
        TemplateJob {
            from_name: "landing".into(),
            from_type: SourceKind::Template,
            to_name: "my-site".into(),
            to_type: SourceKind::Project,
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn copies_template_into_project_bucket(pool: PgPool) {
        let (state, storage, queue) = db_state(pool);
        seed_storage(&state, &storage).await;
        seed_rows(&state).await;
        storage
            .create_bucket(&state.config.bucket_name("my-site"))
            .await
            .unwrap();
        enqueue_template_job(queue.as_ref(), &landing_job()).await.unwrap();

        let batch = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 1);
        process_message(&state, &batch[0]).await.unwrap();

        let keys: Vec<String> = storage
            .get_files(&state.config.bucket_name("my-site"), "")
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.key)
            .collect();
        assert_eq!(keys, vec!["css/site.css", "index.html"]);
        assert!(queue.receive(10, Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn project_to_template_adds_prefix() {
        let storage = Arc::new(MemoryStorage::default());
        let state = AppState::fake_with(storage.clone(), Arc::new(MemoryQueue::default()));
        seed_storage(&state, &storage).await;
        let job = TemplateJob {
            from_name: "landing".into(),
            from_type: SourceKind::Template,
            to_name: "landing-copy".into(),
            to_type: SourceKind::Template,
        };
        let copied = copy_files(storage.as_ref(), &state.config, &job).await.unwrap();
        assert_eq!(copied, 2);
        let files = storage
            .get_files(&state.config.storage.template_bucket, "templates/landing-copy/")
            .await
            .unwrap();
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn malformed_message_is_dropped() {
        let queue = Arc::new(MemoryQueue::default());
        let state = AppState::fake_with(Arc::new(MemoryStorage::default()), queue.clone());
        queue.send("not-a-job".into()).await.unwrap();
        let batch = queue.receive(10, Duration::ZERO).await.unwrap();
        process_message(&state, &batch[0]).await.unwrap();
        assert!(queue.receive(10, Duration::ZERO).await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn failed_copy_keeps_message(pool: PgPool) {
        let (state, storage, queue) = db_state(pool);
        seed_storage(&state, &storage).await;
        // The project is registered but its bucket is missing.
        seed_rows(&state).await;
        enqueue_template_job(queue.as_ref(), &landing_job()).await.unwrap();

        let batch = queue.receive(10, Duration::ZERO).await.unwrap();
        assert!(process_message(&state, &batch[0]).await.is_err());
        assert_eq!(queue.receive(10, Duration::ZERO).await.unwrap().len(), 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn job_for_deleted_project_is_dropped(pool: PgPool) {
        let (state, storage, queue) = db_state(pool);
        seed_storage(&state, &storage).await;
        seed_rows(&state).await;
        let job = TemplateJob {
            to_name: "deleted-site".into(),
            ..landing_job()
        };
        enqueue_template_job(queue.as_ref(), &job).await.unwrap();

        let batch = queue.receive(10, Duration::ZERO).await.unwrap();
        process_message(&state, &batch[0]).await.unwrap();
        assert!(queue.receive(10, Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn worker_stops_on_shutdown() {
        let state = AppState::fake();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_worker(state, rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker should stop")
            .unwrap();
    }
}
