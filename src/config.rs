use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Third-party identity provider whose tokens are accepted alongside ours.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub region: String,
    /// Custom S3 endpoint (MinIO and friends). `None` means AWS.
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub bucket_prefix: String,
    pub template_bucket: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub url: String,
    pub endpoint: Option<String>,
    pub worker_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub provider: Option<ProviderConfig>,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
}

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("missing environment variable {name}"))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = required("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: required("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "tessellate".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "tessellate-users".into()),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24),
        };

        // All three must be present for provider tokens to be accepted.
        let provider = match (
            optional("AUTH_PROVIDER_SECRET"),
            optional("AUTH_PROVIDER_ISSUER"),
            optional("AUTH_PROVIDER_AUDIENCE"),
        ) {
            (Some(secret), Some(issuer), Some(audience)) => Some(ProviderConfig {
                secret,
                issuer,
                audience,
            }),
            _ => None,
        };

        let storage = StorageConfig {
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".into()),
            endpoint: optional("S3_ENDPOINT"),
            access_key: optional("AWS_ACCESS_KEY_ID"),
            secret_key: optional("AWS_SECRET_ACCESS_KEY"),
            bucket_prefix: std::env::var("BUCKET_PREFIX").unwrap_or_else(|_| "tessellate-".into()),
            template_bucket: std::env::var("TEMPLATE_BUCKET")
                .unwrap_or_else(|_| "tessellate-templates".into()),
        };

        let queue = QueueConfig {
            url: required("SQS_QUEUE_URL")?,
            endpoint: optional("SQS_ENDPOINT"),
            worker_enabled: std::env::var("QUEUE_WORKER")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        };

        Ok(Self {
            database_url,
            jwt,
            provider,
            storage,
            queue,
        })
    }

    /// Bucket backing a project: configured prefix + name, lower-cased.
    pub fn bucket_name(&self, project_name: &str) -> String {
        format!("{}{}", self.storage.bucket_prefix, project_name).to_lowercase()
    }

    /// Buckets the service owns outside any project.
    pub fn is_reserved_bucket(&self, bucket: &str) -> bool {
        bucket.eq_ignore_ascii_case(&self.storage.template_bucket)
    }
}

#[cfg(test)]
mod tests {
    use crate::state::AppState;

    #[tokio::test]
    async fn bucket_name_is_prefixed_and_lowercased() {
        let state = AppState::fake();
        assert_eq!(state.config.bucket_name("MySite"), "test-mysite");
    }

    #[tokio::test]
    async fn template_bucket_is_reserved() {
        let state = AppState::fake();
        let clash = state.config.bucket_name("Templates");
        assert!(state.config.is_reserved_bucket(&clash));
        assert!(!state.config.is_reserved_bucket(&state.config.bucket_name("my-site")));
    }
}
