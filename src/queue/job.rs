use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::QueueClient;

const SEPARATOR: &str = "**";

/// Where files of a template job come from or go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Template,
    Project,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Template => f.write_str("template"),
            SourceKind::Project => f.write_str("project"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "template" => Ok(SourceKind::Template),
            "project" => Ok(SourceKind::Project),
            other => anyhow::bail!("unknown source kind {other:?}"),
        }
    }
}

/// Copy every file of `from` into `to`. Wire form: `fromName**fromType**toName**toType`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateJob {
    pub from_name: String,
    pub from_type: SourceKind,
    pub to_name: String,
    pub to_type: SourceKind,
}

impl TemplateJob {
    pub fn to_message(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}",
            self.from_name, self.from_type, self.to_name, self.to_type
        )
    }

    pub fn parse(body: &str) -> anyhow::Result<Self> {
        let parts: Vec<&str> = body.trim().split(SEPARATOR).collect();
        let [from_name, from_type, to_name, to_type] = parts.as_slice() else {
            anyhow::bail!("expected 4 fields, got {}", parts.len());
        };
        if from_name.is_empty() || to_name.is_empty() {
            anyhow::bail!("empty name in template job");
        }
        Ok(Self {
            from_name: from_name.to_string(),
            from_type: from_type.parse()?,
            to_name: to_name.to_string(),
            to_type: to_type.parse()?,
        })
    }
}

/// Sends exactly one message for `job`.
pub async fn enqueue_template_job(
    queue: &dyn QueueClient,
    job: &TemplateJob,
) -> anyhow::Result<String> {
    let id = queue.send(job.to_message()).await?;
    info!(message_id = %id, from = %job.from_name, to = %job.to_name, "template job enqueued");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryQueue;

    fn job() -> TemplateJob {
        TemplateJob {
            from_name: "landing".into(),
            from_type: SourceKind::Template,
            to_name: "my-site".into(),
            to_type: SourceKind::Project,
        }
    }

    #[test]
    fn message_layout() {
        assert_eq!(job().to_message(), "landing**template**my-site**project");
    }

    #[test]
    fn parse_reads_the_wire_form() {
        let parsed = TemplateJob::parse("landing**template**my-site**project\n").unwrap();
        assert_eq!(parsed, job());
    }

    #[test]
    fn parse_rejects_malformed_bodies() {
        assert!(TemplateJob::parse("landing**template**my-site").is_err());
        assert!(TemplateJob::parse("a**template**b**project**extra").is_err());
        assert!(TemplateJob::parse("**template**b**project").is_err());
        assert!(TemplateJob::parse("a**folder**b**project").is_err());
    }

    #[tokio::test]
    async fn enqueue_sends_exactly_one_message() {
        let queue = MemoryQueue::default();
        enqueue_template_job(&queue, &job()).await.unwrap();
        assert_eq!(queue.sent(), vec!["landing**template**my-site**project".to_string()]);
    }
}
