//! Backend wrapper that counts calls and injects faults.

use crate::models::{
    blob::{BlobItem, BlobProperties},
    headers::{HttpHeaders, PropertyBag},
};
use crate::services::{
    address::{BlobLocation, ServiceEndpoint},
    backend::{BackendError, BackendResult, ByteStream, CopyOperation, StorageBackend},
    memory_backend::MemoryBackend,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::sync::Notify;
use url::Url;

pub const ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

#[derive(Default)]
pub struct Calls {
    pub creates: AtomicUsize,
    pub uploads: AtomicUsize,
    pub deletes: AtomicUsize,
    pub copies: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct RecordingBackend {
    pub inner: MemoryBackend,
    pub calls: Calls,
    pub fail_creates: AtomicBool,
    pub create_delay: Option<Duration>,
    /// Uploads whose key contains this fragment fail.
    pub fail_uploads_matching: Mutex<Option<String>>,
    /// Creation of this container waits until notified.
    held_create: Mutex<Option<(String, Arc<Notify>)>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::wrapping(MemoryBackend::new(
            ServiceEndpoint::parse(ENDPOINT).expect("valid endpoint"),
        ))
    }

    pub fn wrapping(inner: MemoryBackend) -> Self {
        Self {
            inner,
            calls: Calls::default(),
            fail_creates: AtomicBool::new(false),
            create_delay: None,
            fail_uploads_matching: Mutex::new(None),
            held_create: Mutex::new(None),
        }
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub fn fail_uploads_matching(&self, fragment: &str) {
        *self.fail_uploads_matching.lock().expect("lock") = Some(fragment.to_string());
    }

    /// Hold the creation of `name` until the returned handle is notified.
    pub fn hold_creates_of(&self, name: &str) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        *self.held_create.lock().expect("lock") = Some((name.to_string(), Arc::clone(&release)));
        release
    }

    pub fn creates(&self) -> usize {
        Calls::get(&self.calls.creates)
    }

    pub fn uploads(&self) -> usize {
        Calls::get(&self.calls.uploads)
    }

    pub fn deletes(&self) -> usize {
        Calls::get(&self.calls.deletes)
    }

    pub fn copies(&self) -> usize {
        Calls::get(&self.calls.copies)
    }
}

#[async_trait]
impl StorageBackend for RecordingBackend {
    fn endpoint(&self) -> &ServiceEndpoint {
        self.inner.endpoint()
    }

    async fn create_container_if_missing(&self, name: &str) -> BackendResult<bool> {
        self.calls.creates.fetch_add(1, Ordering::SeqCst);
        let held = self
            .held_create
            .lock()
            .expect("lock")
            .as_ref()
            .filter(|(held, _)| held == name)
            .map(|(_, release)| Arc::clone(release));
        if let Some(release) = held {
            release.notified().await;
        }
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(BackendError::Io(io::Error::other("create refused")));
        }
        self.inner.create_container_if_missing(name).await
    }

    async fn upload(
        &self,
        container: &str,
        key: &str,
        body: ByteStream<'_>,
        headers: Option<&HttpHeaders>,
        metadata: Option<&PropertyBag>,
    ) -> BackendResult<()> {
        self.calls.uploads.fetch_add(1, Ordering::SeqCst);
        let failing = self.fail_uploads_matching.lock().expect("lock").clone();
        if failing.is_some_and(|fragment| key.contains(&fragment)) {
            return Err(BackendError::Io(io::Error::other("upload refused")));
        }
        self.inner.upload(container, key, body, headers, metadata).await
    }

    async fn download(&self, container: &str, key: &str) -> BackendResult<ByteStream<'static>> {
        self.inner.download(container, key).await
    }

    async fn delete_if_exists(&self, container: &str, key: &str) -> BackendResult<bool> {
        self.calls.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_if_exists(container, key).await
    }

    async fn exists(&self, container: &str, key: &str) -> BackendResult<bool> {
        self.inner.exists(container, key).await
    }

    async fn get_properties(&self, container: &str, key: &str) -> BackendResult<BlobProperties> {
        self.inner.get_properties(container, key).await
    }

    async fn set_http_headers(
        &self,
        container: &str,
        key: &str,
        headers: &HttpHeaders,
    ) -> BackendResult<()> {
        self.inner.set_http_headers(container, key, headers).await
    }

    async fn start_copy_from_uri(
        &self,
        source: &Url,
        container: &str,
        key: &str,
        metadata: Option<&PropertyBag>,
    ) -> BackendResult<CopyOperation> {
        self.calls.copies.fetch_add(1, Ordering::SeqCst);
        self.inner
            .start_copy_from_uri(source, container, key, metadata)
            .await
    }

    async fn copy_from(
        &self,
        source: &dyn StorageBackend,
        location: &BlobLocation,
        container: &str,
        key: &str,
        metadata: Option<&PropertyBag>,
    ) -> BackendResult<CopyOperation> {
        self.calls.copies.fetch_add(1, Ordering::SeqCst);
        self.inner
            .copy_from(source, location, container, key, metadata)
            .await
    }

    fn list<'a>(
        &'a self,
        container: &'a str,
        prefix: &'a str,
    ) -> BoxStream<'a, BackendResult<BlobItem>> {
        self.inner.list(container, prefix)
    }
}
