//! In-process backend keeping containers and blobs in ordered maps.

use crate::models::{
    blob::{BlobItem, BlobProperties, CopyStatus},
    headers::{HttpHeaders, PropertyBag},
};
use crate::services::{
    address::ServiceEndpoint,
    backend::{BackendError, BackendResult, ByteStream, CopyOperation, StorageBackend},
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{
    StreamExt, TryStreamExt,
    stream::{self, BoxStream},
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct StoredBlob {
    content: Bytes,
    properties: BlobProperties,
    deleted: bool,
}

type Containers = HashMap<String, BTreeMap<String, StoredBlob>>;

/// Backend holding everything in memory. Deletes are soft until the key is
/// written again.
#[derive(Clone)]
pub struct MemoryBackend {
    endpoint: ServiceEndpoint,
    containers: Arc<RwLock<Containers>>,
    copy_latency: Option<Duration>,
}

impl MemoryBackend {
    pub fn new(endpoint: ServiceEndpoint) -> Self {
        Self {
            endpoint,
            containers: Arc::new(RwLock::new(HashMap::new())),
            copy_latency: None,
        }
    }

    /// Leave copies pending for `latency` before they complete.
    pub fn with_copy_latency(mut self, latency: Duration) -> Self {
        self.copy_latency = Some(latency);
        self
    }

    fn not_found(container: &str, key: &str) -> BackendError {
        BackendError::BlobNotFound {
            container: container.to_string(),
            key: key.to_string(),
        }
    }

    async fn live_blob(&self, container: &str, key: &str) -> BackendResult<StoredBlob> {
        let containers = self.containers.read().await;
        containers
            .get(container)
            .ok_or_else(|| BackendError::ContainerNotFound(container.to_string()))?
            .get(key)
            .filter(|blob| !blob.deleted)
            .cloned()
            .ok_or_else(|| Self::not_found(container, key))
    }

    async fn snapshot(&self, container: &str, prefix: &str) -> Vec<BackendResult<BlobItem>> {
        let containers = self.containers.read().await;
        let Some(blobs) = containers.get(container) else {
            return vec![Err(BackendError::ContainerNotFound(container.to_string()))];
        };
        blobs
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, blob)| {
                Ok(BlobItem {
                    name: key.clone(),
                    deleted: blob.deleted,
                    properties: blob.properties.clone(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    async fn create_container_if_missing(&self, name: &str) -> BackendResult<bool> {
        let mut containers = self.containers.write().await;
        if containers.contains_key(name) {
            return Ok(false);
        }
        containers.insert(name.to_string(), BTreeMap::new());
        Ok(true)
    }

    async fn upload(
        &self,
        container: &str,
        key: &str,
        body: ByteStream<'_>,
        headers: Option<&HttpHeaders>,
        metadata: Option<&PropertyBag>,
    ) -> BackendResult<()> {
        if key.is_empty() {
            return Err(BackendError::InvalidKey(key.to_string()));
        }
        let content = body
            .try_fold(BytesMut::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?
            .freeze();

        let digest = md5::compute(&content);
        let mut http_headers = headers.cloned().unwrap_or_default();
        if http_headers.content_hash.is_none() {
            http_headers.content_hash = Some(digest.0.to_vec());
        }
        let now = Utc::now();
        let blob = StoredBlob {
            properties: BlobProperties {
                content_length: content.len() as i64,
                http_headers,
                etag: format!("{:x}", digest),
                created_on: now,
                last_modified: now,
                copy_id: None,
                copy_source: None,
                copy_status: None,
                metadata: metadata.cloned().unwrap_or_default(),
            },
            content,
            deleted: false,
        };

        let mut containers = self.containers.write().await;
        containers
            .get_mut(container)
            .ok_or_else(|| BackendError::ContainerNotFound(container.to_string()))?
            .insert(key.to_string(), blob);
        Ok(())
    }

    async fn download(&self, container: &str, key: &str) -> BackendResult<ByteStream<'static>> {
        let blob = self.live_blob(container, key).await?;
        Ok(stream::once(async move { Ok(blob.content) }).boxed())
    }

    async fn delete_if_exists(&self, container: &str, key: &str) -> BackendResult<bool> {
        let mut containers = self.containers.write().await;
        let Some(blob) = containers
            .get_mut(container)
            .and_then(|blobs| blobs.get_mut(key))
            .filter(|blob| !blob.deleted)
        else {
            return Ok(false);
        };
        blob.deleted = true;
        Ok(true)
    }

    async fn exists(&self, container: &str, key: &str) -> BackendResult<bool> {
        let containers = self.containers.read().await;
        Ok(containers
            .get(container)
            .and_then(|blobs| blobs.get(key))
            .is_some_and(|blob| !blob.deleted))
    }

    async fn get_properties(&self, container: &str, key: &str) -> BackendResult<BlobProperties> {
        Ok(self.live_blob(container, key).await?.properties)
    }

    async fn set_http_headers(
        &self,
        container: &str,
        key: &str,
        headers: &HttpHeaders,
    ) -> BackendResult<()> {
        let mut containers = self.containers.write().await;
        let blob = containers
            .get_mut(container)
            .and_then(|blobs| blobs.get_mut(key))
            .filter(|blob| !blob.deleted)
            .ok_or_else(|| Self::not_found(container, key))?;
        blob.properties.http_headers = headers.clone();
        blob.properties.last_modified = Utc::now();
        Ok(())
    }

    async fn start_copy_from_uri(
        &self,
        source: &Url,
        container: &str,
        key: &str,
        metadata: Option<&PropertyBag>,
    ) -> BackendResult<CopyOperation> {
        let location = self
            .endpoint
            .locate(source)
            .ok_or_else(|| BackendError::UnsupportedSource(source.to_string()))?;
        let source_blob = self.live_blob(&location.container, &location.key).await?;

        let copy_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let mut properties = source_blob.properties.clone();
        properties.created_on = now;
        properties.last_modified = now;
        properties.copy_id = Some(copy_id.clone());
        properties.copy_source = Some(source.to_string());
        properties.copy_status = Some(match self.copy_latency {
            Some(_) => CopyStatus::Pending,
            None => CopyStatus::Success,
        });
        if let Some(metadata) = metadata {
            properties.metadata = metadata.clone();
        }

        {
            let mut containers = self.containers.write().await;
            containers
                .get_mut(container)
                .ok_or_else(|| BackendError::ContainerNotFound(container.to_string()))?
                .insert(
                    key.to_string(),
                    StoredBlob {
                        content: source_blob.content,
                        properties,
                        deleted: false,
                    },
                );
        }
        debug!(copy_id = %copy_id, source = %source, container, key, "copy started");

        let Some(latency) = self.copy_latency else {
            return Ok(CopyOperation::completed(copy_id));
        };

        let (operation, progress) = CopyOperation::pending(copy_id);
        let containers = Arc::clone(&self.containers);
        let (container, key) = (container.to_string(), key.to_string());
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            if let Some(blob) = containers
                .write()
                .await
                .get_mut(&container)
                .and_then(|blobs| blobs.get_mut(&key))
            {
                blob.properties.copy_status = Some(CopyStatus::Success);
            }
            progress.finish(CopyStatus::Success);
        });
        Ok(operation)
    }

    fn list<'a>(
        &'a self,
        container: &'a str,
        prefix: &'a str,
    ) -> BoxStream<'a, BackendResult<BlobItem>> {
        stream::once(self.snapshot(container, prefix))
            .flat_map(stream::iter)
            .boxed()
    }
}
