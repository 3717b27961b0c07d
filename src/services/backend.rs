//! Storage backend contract consumed by the repository.
//!
//! A backend is one storage account: a flat key space per container plus
//! server-side copy and query signing. Virtual directories, property
//! projection and container caching all live above this trait.

use crate::models::{
    blob::{BlobItem, BlobProperties, CopyStatus},
    headers::{HttpHeaders, PropertyBag},
};
use crate::services::{
    address::{BlobLocation, ServiceEndpoint},
    sas::{SasParameters, SharedKeyCredential},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::io;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

/// A stream of payload chunks.
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("container `{0}` not found")]
    ContainerNotFound(String),
    #[error("blob `{key}` not found in container `{container}`")]
    BlobNotFound { container: String, key: String },
    #[error("container `{name}` invalid: {reason}")]
    InvalidContainerName { name: String, reason: String },
    #[error("invalid blob key `{0}`")]
    InvalidKey(String),
    #[error("copy source `{0}` is not served by this account")]
    UnsupportedSource(String),
    #[error("access denied: {0}")]
    Unauthorized(String),
    #[error("corrupt metadata for blob `{key}`: {source}")]
    CorruptMetadata {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Outcome of a named readiness probe.
#[derive(Debug, Clone)]
pub struct ReadinessCheck {
    pub name: &'static str,
    pub error: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CopyWaitError {
    #[error("cancelled while waiting for copy completion")]
    Cancelled,
    #[error("copy failed: {0}")]
    Failed(String),
}

/// Completion handle of a server-side copy.
#[derive(Debug)]
pub struct CopyOperation {
    id: String,
    status: watch::Receiver<CopyStatus>,
}

/// Producer side of a pending [`CopyOperation`].
#[derive(Debug)]
pub struct CopyProgress {
    status: watch::Sender<CopyStatus>,
}

impl CopyProgress {
    pub fn finish(self, status: CopyStatus) {
        let _ = self.status.send(status);
    }
}

impl CopyOperation {
    /// A copy the backend finished synchronously.
    pub fn completed(id: impl Into<String>) -> Self {
        let (_, status) = watch::channel(CopyStatus::Success);
        Self {
            id: id.into(),
            status,
        }
    }

    /// A copy that completes when the returned progress handle is finished.
    pub fn pending(id: impl Into<String>) -> (Self, CopyProgress) {
        let (tx, rx) = watch::channel(CopyStatus::Pending);
        (
            Self {
                id: id.into(),
                status: rx,
            },
            CopyProgress { status: tx },
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Block until the backend reports completion.
    ///
    /// A completed status wins over a cancellation requested at the same
    /// time. A progress handle dropped while pending counts as failure.
    pub async fn wait_for_completion(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<(), CopyWaitError> {
        loop {
            let current = self.status.borrow_and_update().clone();
            match current {
                CopyStatus::Success => return Ok(()),
                CopyStatus::Failed(reason) => return Err(CopyWaitError::Failed(reason)),
                CopyStatus::Pending => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(CopyWaitError::Cancelled),
                changed = self.status.changed() => {
                    if changed.is_err() && *self.status.borrow() == CopyStatus::Pending {
                        return Err(CopyWaitError::Failed("copy abandoned by backend".into()));
                    }
                }
            }
        }
    }
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Blob service endpoint of the account.
    fn endpoint(&self) -> &ServiceEndpoint;

    /// Create the container unless it exists. Returns whether it was created.
    async fn create_container_if_missing(&self, name: &str) -> BackendResult<bool>;

    async fn upload(
        &self,
        container: &str,
        key: &str,
        body: ByteStream<'_>,
        headers: Option<&HttpHeaders>,
        metadata: Option<&PropertyBag>,
    ) -> BackendResult<()>;

    async fn download(&self, container: &str, key: &str) -> BackendResult<ByteStream<'static>>;

    /// Delete the blob if present. Returns whether something was deleted.
    async fn delete_if_exists(&self, container: &str, key: &str) -> BackendResult<bool>;

    async fn exists(&self, container: &str, key: &str) -> BackendResult<bool>;

    async fn get_properties(&self, container: &str, key: &str) -> BackendResult<BlobProperties>;

    /// Replace the HTTP headers of an existing blob.
    async fn set_http_headers(
        &self,
        container: &str,
        key: &str,
        headers: &HttpHeaders,
    ) -> BackendResult<()>;

    /// Start a server-side copy of `source` into `container/key`.
    ///
    /// When `metadata` is `None` the source metadata is carried over.
    async fn start_copy_from_uri(
        &self,
        source: &Url,
        container: &str,
        key: &str,
        metadata: Option<&PropertyBag>,
    ) -> BackendResult<CopyOperation>;

    /// Copy a blob held by `source`, another account, into `container/key`.
    ///
    /// The payload streams through this process, so the copy has completed
    /// when this returns. Source headers are kept; `metadata` replaces the
    /// source metadata when set.
    async fn copy_from(
        &self,
        source: &dyn StorageBackend,
        location: &BlobLocation,
        container: &str,
        key: &str,
        metadata: Option<&PropertyBag>,
    ) -> BackendResult<CopyOperation> {
        let properties = source
            .get_properties(&location.container, &location.key)
            .await?;
        let body = source.download(&location.container, &location.key).await?;
        self.upload(
            container,
            key,
            body,
            Some(&properties.http_headers),
            Some(metadata.unwrap_or(&properties.metadata)),
        )
        .await?;
        Ok(CopyOperation::completed(Uuid::new_v4().to_string()))
    }

    /// Lazily enumerate blobs whose key starts with `prefix`, soft-deleted
    /// entries included.
    fn list<'a>(
        &'a self,
        container: &'a str,
        prefix: &'a str,
    ) -> BoxStream<'a, BackendResult<BlobItem>>;

    /// Sign a SAS query string with the account credential.
    fn sign_query(
        &self,
        parameters: &SasParameters,
        credential: &SharedKeyCredential,
    ) -> BackendResult<String> {
        Ok(credential.sign(parameters))
    }

    /// Backend specific readiness probes.
    async fn readiness(&self) -> Vec<ReadinessCheck> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn completed_copy_wins_over_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut op = CopyOperation::completed("c1");
        assert_eq!(op.wait_for_completion(&cancel).await, Ok(()));
    }

    #[tokio::test]
    async fn pending_copy_waits_for_progress() {
        let (mut op, progress) = CopyOperation::pending("c2");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            progress.finish(CopyStatus::Success);
        });
        assert_eq!(op.wait_for_completion(&CancellationToken::new()).await, Ok(()));
    }

    #[tokio::test]
    async fn pending_copy_observes_cancellation() {
        let (mut op, _progress) = CopyOperation::pending("c3");
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            op.wait_for_completion(&cancel).await,
            Err(CopyWaitError::Cancelled)
        );
    }

    #[tokio::test]
    async fn dropped_progress_is_a_failure() {
        let (mut op, progress) = CopyOperation::pending("c4");
        drop(progress);
        assert!(matches!(
            op.wait_for_completion(&CancellationToken::new()).await,
            Err(CopyWaitError::Failed(_))
        ));
    }

    #[tokio::test]
    async fn failed_copy_reports_reason() {
        let (mut op, progress) = CopyOperation::pending("c5");
        progress.finish(CopyStatus::Failed("quota".into()));
        assert_eq!(
            op.wait_for_completion(&CancellationToken::new()).await,
            Err(CopyWaitError::Failed("quota".into()))
        );
    }
}
