use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::body::Bytes;
use reqwest::Client;
use std::path::PathBuf;
use tracing::info;

#[async_trait]
pub trait PhotoStore: Send + Sync {
    /// Stores the object under `key` and returns the URL it is served from.
    async fn put(&self, key: &str, content_type: &str, bytes: Bytes) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct HttpPhotoStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpPhotoStore {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn object_url(&self, key: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/{}", self.base_url, encoded.join("/"))
    }
}

#[async_trait]
impl PhotoStore for HttpPhotoStore {
    async fn put(&self, key: &str, content_type: &str, bytes: Bytes) -> Result<String> {
        let url = self.object_url(key);
        let mut request = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.context("object store unreachable")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "object store rejected upload of '{}': {}",
                key,
                response.status()
            ));
        }
        info!("Uploaded photo to {}", url);
        Ok(url)
    }
}

#[derive(Debug, Clone)]
pub struct DiskPhotoStore {
    root: PathBuf,
    public_base: String,
}

impl DiskPhotoStore {
    pub fn new(root: impl Into<PathBuf>, public_base: &str) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PhotoStore for DiskPhotoStore {
    async fn put(&self, key: &str, _content_type: &str, bytes: Bytes) -> Result<String> {
        if key.split('/').any(|segment| segment.is_empty() || segment == "..") {
            return Err(anyhow!("invalid object key '{}'", key));
        }
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Stored photo at {}", path.display());
        Ok(format!("{}/{}", self.public_base, key))
    }
}
