use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion, SdkConfig};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    error::ProvideErrorMetadata,
    presigning::PresigningConfig,
    types::{
        BucketCannedAcl, BucketLocationConstraint, CorsConfiguration, CorsRule,
        CreateBucketConfiguration, ErrorDocument, IndexDocument, WebsiteConfiguration,
    },
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;

pub const INDEX_DOCUMENT: &str = "index.html";
pub const ERROR_DOCUMENT: &str = "error.html";

#[derive(Debug, Clone)]
pub struct FileUpload {
    pub key: String,
    pub body: Bytes,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoredFile {
    pub key: String,
    pub size: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_modified: Option<OffsetDateTime>,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignedAction {
    Get,
    Put,
}

#[derive(Debug, Clone)]
pub struct SignedUrlRequest {
    pub bucket: String,
    pub key: String,
    pub action: SignedAction,
    pub content_type: Option<String>,
    pub expires_in: Duration,
}

#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn create_bucket(&self, name: &str) -> anyhow::Result<()>;
    /// Applies CORS and website hosting to an existing bucket, returning the site URL.
    async fn configure_site(&self, name: &str) -> anyhow::Result<String>;
    /// Empties and deletes the bucket. `Ok(false)` when it did not exist.
    async fn delete_bucket(&self, name: &str) -> anyhow::Result<bool>;
    async fn list_buckets(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
    async fn save_file(&self, bucket: &str, file: FileUpload) -> anyhow::Result<()>;
    async fn get_files(&self, bucket: &str, prefix: &str) -> anyhow::Result<Vec<StoredFile>>;
    async fn delete_object(&self, bucket: &str, key: &str) -> anyhow::Result<()>;
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> anyhow::Result<()>;
    async fn signed_url(&self, req: SignedUrlRequest) -> anyhow::Result<String>;
}

/// Shared AWS config, also used by the queue client.
pub async fn load_aws_config(cfg: &StorageConfig) -> SdkConfig {
    let mut loader = defaults(BehaviorVersion::latest()).region(Region::new(cfg.region.clone()));
    if let (Some(access_key), Some(secret_key)) = (&cfg.access_key, &cfg.secret_key) {
        loader = loader.credentials_provider(Credentials::new(
            access_key, secret_key, None, None, "static",
        ));
    }
    loader.load().await
}

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    region: String,
    site_base: Option<String>,
}

impl S3Storage {
    pub fn new(shared: &SdkConfig, cfg: &StorageConfig) -> Self {
        let mut conf = S3ConfigBuilder::from(shared);
        if let Some(endpoint) = &cfg.endpoint {
            conf = conf.endpoint_url(endpoint).force_path_style(true);
        }
        Self {
            client: Client::from_conf(conf.build()),
            region: cfg.region.clone(),
            site_base: cfg.endpoint.clone(),
        }
    }

    fn site_url(&self, bucket: &str) -> String {
        website_url(self.site_base.as_deref(), &self.region, bucket)
    }

    async fn put_cors(&self, name: &str) -> anyhow::Result<()> {
        let rule = CorsRule::builder()
            .allowed_headers("*")
            .allowed_methods("GET")
            .allowed_methods("PUT")
            .allowed_methods("POST")
            .allowed_methods("HEAD")
            .allowed_origins("*")
            .max_age_seconds(3000)
            .build()
            .context("build cors rule")?;
        let cors = CorsConfiguration::builder()
            .cors_rules(rule)
            .build()
            .context("build cors configuration")?;
        self.client
            .put_bucket_cors()
            .bucket(name)
            .cors_configuration(cors)
            .send()
            .await
            .with_context(|| format!("s3 put_bucket_cors {name}"))?;
        Ok(())
    }

    async fn put_website(&self, name: &str) -> anyhow::Result<()> {
        let website = WebsiteConfiguration::builder()
            .index_document(
                IndexDocument::builder()
                    .suffix(INDEX_DOCUMENT)
                    .build()
                    .context("build index document")?,
            )
            .error_document(
                ErrorDocument::builder()
                    .key(ERROR_DOCUMENT)
                    .build()
                    .context("build error document")?,
            )
            .build();
        self.client
            .put_bucket_website()
            .bucket(name)
            .website_configuration(website)
            .send()
            .await
            .with_context(|| format!("s3 put_bucket_website {name}"))?;
        Ok(())
    }
}

/// Public website URL of a bucket: path-style under a custom endpoint,
/// otherwise the regional AWS website host.
pub fn website_url(endpoint: Option<&str>, region: &str, bucket: &str) -> String {
    match endpoint {
        Some(base) => format!("{}/{}", base.trim_end_matches('/'), bucket),
        None => format!("http://{}.s3-website-{}.amazonaws.com", bucket, region),
    }
}

fn is_no_such_bucket<E: ProvideErrorMetadata>(err: &E) -> bool {
    err.code() == Some("NoSuchBucket")
}

#[async_trait]
impl StorageClient for S3Storage {
    async fn create_bucket(&self, name: &str) -> anyhow::Result<()> {
        let mut req = self
            .client
            .create_bucket()
            .bucket(name)
            .acl(BucketCannedAcl::PublicRead);
        // us-east-1 rejects an explicit location constraint.
        if self.region != "us-east-1" {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        req.send()
            .await
            .with_context(|| format!("s3 create_bucket {name}"))?;
        info!(bucket = %name, "bucket created");
        Ok(())
    }

    async fn configure_site(&self, name: &str) -> anyhow::Result<String> {
        self.put_cors(name).await?;
        self.put_website(name).await?;
        Ok(self.site_url(name))
    }

    async fn delete_bucket(&self, name: &str) -> anyhow::Result<bool> {
        let files = match self.list_all(name, "").await {
            Ok(files) => files,
            Err(e) if is_no_such_bucket(&e) => {
                debug!(bucket = %name, "bucket already gone");
                return Ok(false);
            }
            Err(e) => return Err(anyhow::Error::new(e).context(format!("s3 list_objects {name}"))),
        };
        for f in files {
            self.delete_object(name, &f.key).await?;
        }
        match self.client.delete_bucket().bucket(name).send().await {
            Ok(_) => {
                info!(bucket = %name, "bucket deleted");
                Ok(true)
            }
            Err(e) if is_no_such_bucket(&e) => Ok(false),
            Err(e) => Err(anyhow::Error::new(e).context(format!("s3 delete_bucket {name}"))),
        }
    }

    async fn list_buckets(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let out = self
            .client
            .list_buckets()
            .send()
            .await
            .context("s3 list_buckets")?;
        let mut names: Vec<String> = out
            .buckets()
            .iter()
            .filter_map(|b| b.name())
            .filter(|n| n.starts_with(prefix))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn save_file(&self, bucket: &str, file: FileUpload) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(&file.key)
            .body(ByteStream::from(file.body))
            .content_type(&file.content_type)
            .send()
            .await
            .with_context(|| format!("s3 put_object {}/{}", bucket, file.key))?;
        Ok(())
    }

    async fn get_files(&self, bucket: &str, prefix: &str) -> anyhow::Result<Vec<StoredFile>> {
        self.list_all(bucket, prefix)
            .await
            .map_err(|e| anyhow::Error::new(e).context(format!("s3 list_objects {bucket}")))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("s3 delete_object {bucket}/{key}"))?;
        Ok(())
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> anyhow::Result<()> {
        self.client
            .copy_object()
            .copy_source(format!("{src_bucket}/{src_key}"))
            .bucket(dst_bucket)
            .key(dst_key)
            .send()
            .await
            .with_context(|| format!("s3 copy_object {src_bucket}/{src_key} -> {dst_bucket}/{dst_key}"))?;
        Ok(())
    }

    async fn signed_url(&self, req: SignedUrlRequest) -> anyhow::Result<String> {
        let presigning = PresigningConfig::expires_in(req.expires_in)?;
        let presigned = match req.action {
            SignedAction::Get => self
                .client
                .get_object()
                .bucket(&req.bucket)
                .key(&req.key)
                .presigned(presigning)
                .await
                .context("s3 presign get_object")?,
            SignedAction::Put => self
                .client
                .put_object()
                .bucket(&req.bucket)
                .key(&req.key)
                .set_content_type(req.content_type.clone())
                .presigned(presigning)
                .await
                .context("s3 presign put_object")?,
        };
        Ok(presigned.uri().to_string())
    }
}

impl S3Storage {
    async fn list_all(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<
        Vec<StoredFile>,
        aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error>,
    > {
        let mut files = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await?;
            for obj in page.contents() {
                let Some(key) = obj.key() else { continue };
                files.push(StoredFile {
                    key: key.to_string(),
                    size: obj.size().unwrap_or_default(),
                    last_modified: obj
                        .last_modified()
                        .and_then(|d| OffsetDateTime::from_unix_timestamp(d.secs()).ok()),
                    etag: obj.e_tag().map(|t| t.trim_matches('"').to_string()),
                });
            }
            match (page.is_truncated(), page.next_continuation_token()) {
                (Some(true), Some(next)) => token = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(files)
    }
}

pub fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "text/html" => Some("html"),
        "text/css" => Some("css"),
        "application/javascript" | "text/javascript" => Some("js"),
        "application/json" => Some("json"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        _ => None,
    }
}

pub fn mime_from_path(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" | "map" => "application/json",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        _ => "application/octet-stream",
    }
}

/// Uploads every file under `dir`, keyed by its `/`-separated relative path.
/// Returns the uploaded keys, sorted.
pub async fn upload_local_dir(
    storage: &dyn StorageClient,
    bucket: &str,
    dir: &Path,
) -> anyhow::Result<Vec<String>> {
    let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];
    let mut keys = Vec::new();
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .with_context(|| format!("read dir {}", current.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if !file_type.is_file() {
                warn!(path = %path.display(), "skipping non-regular file");
                continue;
            }
            let key = relative_key(dir, &path)?;
            let body = tokio::fs::read(&path)
                .await
                .with_context(|| format!("read file {}", path.display()))?;
            let content_type = mime_from_path(&key).to_string();
            storage
                .save_file(
                    bucket,
                    FileUpload {
                        key: key.clone(),
                        body: Bytes::from(body),
                        content_type,
                    },
                )
                .await?;
            debug!(bucket = %bucket, key = %key, "uploaded");
            keys.push(key);
        }
    }
    keys.sort();
    Ok(keys)
}

fn relative_key(root: &Path, path: &Path) -> anyhow::Result<String> {
    let rel = path
        .strip_prefix(root)
        .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStorage;

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("text/html"), Some("html"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[test]
    fn website_url_depends_on_endpoint() {
        assert_eq!(
            website_url(Some("http://minio.local:9000/"), "us-east-1", "tess-site"),
            "http://minio.local:9000/tess-site"
        );
        assert_eq!(
            website_url(None, "eu-west-1", "tess-site"),
            "http://tess-site.s3-website-eu-west-1.amazonaws.com"
        );
    }

    #[test]
    fn test_mime_from_path() {
        assert_eq!(mime_from_path("index.html"), "text/html");
        assert_eq!(mime_from_path("assets/APP.JS"), "application/javascript");
        assert_eq!(mime_from_path("fonts/x.woff2"), "font/woff2");
        assert_eq!(mime_from_path("README"), "application/octet-stream");
    }

    #[tokio::test]
    async fn upload_local_dir_uses_relative_keys() {
        let root = std::env::temp_dir().join(format!("tessellate-upload-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(root.join("css/nested")).await.unwrap();
        tokio::fs::write(root.join("index.html"), "<h1>hi</h1>").await.unwrap();
        tokio::fs::write(root.join("css/site.css"), "body{}").await.unwrap();
        tokio::fs::write(root.join("css/nested/a.css"), "a{}").await.unwrap();

        let storage = MemoryStorage::default();
        storage.create_bucket("site").await.unwrap();
        let keys = upload_local_dir(&storage, "site", &root).await.unwrap();
        assert_eq!(keys, vec!["css/nested/a.css", "css/site.css", "index.html"]);

        let files = storage.get_files("site", "css/").await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(
            storage.content_type("site", "index.html").as_deref(),
            Some("text/html")
        );

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn upload_local_dir_fails_on_missing_dir() {
        let storage = MemoryStorage::default();
        let err = upload_local_dir(&storage, "site", Path::new("/definitely/not/here"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("read dir"));
    }
}
