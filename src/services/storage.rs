use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores `bytes` under `path` and returns a public URL for it.
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;
    async fn delete(&self, path: &str) -> Result<()>;
}

/// Replaces every character outside `[A-Za-z0-9.]` so object names stay URL-safe.
pub fn object_name(epoch_millis: i64, file_name: &str) -> String {
    let cleaned: String = file_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
        .collect();
    format!("{epoch_millis}_{cleaned}")
}

/// Bucket exposed over plain HTTP: `PUT`/`DELETE {endpoint}/{path}`.
pub struct HttpObjectStorage {
    client: reqwest::Client,
    endpoint: String,
    public_base: String,
    api_key: Option<String>,
}

impl HttpObjectStorage {
    pub fn new(endpoint: &str, public_base: &str, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            public_base: public_base.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let url = format!("{}/{}", self.endpoint, path);
        self.authorize(self.client.put(&url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| anyhow!("upload of {path} failed: {e}"))?;
        Ok(format!("{}/{}", self.public_base, path))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let url = format!("{}/{}", self.endpoint, path);
        self.authorize(self.client.delete(&url))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| anyhow!("delete of {path} failed: {e}"))?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryObjectStorage {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

#[cfg(test)]
impl MemoryObjectStorage {
    pub async fn contains(&self, path: &str) -> bool {
        self.objects.read().await.contains_key(path)
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn upload(&self, path: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String> {
        self.objects.write().await.insert(path.to_string(), bytes);
        Ok(format!("memory://{path}"))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects
            .write()
            .await
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| anyhow!("no object at {path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_names_are_sanitised() {
        assert_eq!(object_name(1700000000000, "安全生产法 2021.pdf"), "1700000000000_______2021.pdf");
        assert_eq!(object_name(1, "rules-v2.docx"), "1_rules_v2.docx");
    }

    #[tokio::test]
    async fn memory_storage_round_trip() {
        let storage = MemoryObjectStorage::default();
        let url = storage.upload("1_a.pdf", vec![1, 2, 3], "application/pdf").await.unwrap();
        assert_eq!(url, "memory://1_a.pdf");
        assert!(storage.contains("1_a.pdf").await);
        storage.delete("1_a.pdf").await.unwrap();
        assert!(storage.delete("1_a.pdf").await.is_err());
    }
}
