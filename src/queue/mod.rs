//! Message queue used to hand template copies to the background worker.

mod job;
pub mod worker;

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_sqs::{config::Builder as SqsConfigBuilder, Client};
use tracing::debug;

use crate::config::QueueConfig;

pub use job::{enqueue_template_job, SourceKind, TemplateJob};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub receipt: String,
    pub body: String,
}

#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Sends one message, returning the id the queue assigned to it.
    async fn send(&self, body: String) -> anyhow::Result<String>;
    async fn receive(&self, max: i32, wait: Duration) -> anyhow::Result<Vec<ReceivedMessage>>;
    async fn delete(&self, receipt: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct SqsQueue {
    client: Client,
    url: String,
}

impl SqsQueue {
    pub fn new(shared: &SdkConfig, cfg: &QueueConfig) -> Self {
        let mut conf = SqsConfigBuilder::from(shared);
        if let Some(endpoint) = &cfg.endpoint {
            conf = conf.endpoint_url(endpoint);
        }
        Self {
            client: Client::from_conf(conf.build()),
            url: cfg.url.clone(),
        }
    }
}

#[async_trait]
impl QueueClient for SqsQueue {
    async fn send(&self, body: String) -> anyhow::Result<String> {
        let out = self
            .client
            .send_message()
            .queue_url(&self.url)
            .message_body(body)
            .send()
            .await
            .context("sqs send_message")?;
        let id = out.message_id().unwrap_or_default().to_string();
        debug!(message_id = %id, "message sent");
        Ok(id)
    }

    async fn receive(&self, max: i32, wait: Duration) -> anyhow::Result<Vec<ReceivedMessage>> {
        let out = self
            .client
            .receive_message()
            .queue_url(&self.url)
            .max_number_of_messages(max)
            .wait_time_seconds(wait.as_secs() as i32)
            .send()
            .await
            .context("sqs receive_message")?;
        Ok(out
            .messages()
            .iter()
            .filter_map(|m| {
                Some(ReceivedMessage {
                    receipt: m.receipt_handle()?.to_string(),
                    body: m.body().unwrap_or_default().to_string(),
                })
            })
            .collect())
    }

    async fn delete(&self, receipt: &str) -> anyhow::Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.url)
            .receipt_handle(receipt)
            .send()
            .await
            .context("sqs delete_message")?;
        Ok(())
    }
}
