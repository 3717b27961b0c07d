//! Cache of container handles, creating containers on first use.

use crate::models::container::ContainerHandle;
use crate::services::{
    backend::StorageBackend,
    error::{RepositoryError, RepositoryResult},
};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

/// Maps container names to handles of containers known to exist.
///
/// Lookups take the read lock only. A miss serializes on a guard of its own
/// name and checks the cache again, so concurrent first resolutions of a name
/// issue a single backend create and share one handle, while other names
/// resolve independently.
pub struct ContainerRegistry {
    backend: Arc<dyn StorageBackend>,
    handles: RwLock<HashMap<String, Arc<ContainerHandle>>>,
    creating: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ContainerRegistry {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            handles: RwLock::new(HashMap::new()),
            creating: Mutex::new(HashMap::new()),
        }
    }

    async fn cached(&self, name: &str) -> Option<Arc<ContainerHandle>> {
        self.handles.read().await.get(name).cloned()
    }

    async fn creation_guard(&self, name: &str) -> Arc<Mutex<()>> {
        let mut creating = self.creating.lock().await;
        Arc::clone(creating.entry(name.to_string()).or_default())
    }

    pub async fn resolve(&self, name: &str) -> RepositoryResult<Arc<ContainerHandle>> {
        if let Some(handle) = self.cached(name).await {
            return Ok(handle);
        }

        let guard = self.creation_guard(name).await;
        let _creating = guard.lock().await;
        if let Some(handle) = self.cached(name).await {
            return Ok(handle);
        }

        let uri = self.backend.endpoint().container_uri(name);
        match self.backend.create_container_if_missing(name).await {
            Ok(true) => info!(container = %uri, "created container"),
            Ok(false) => debug!(container = %uri, "container already exists"),
            Err(source) => {
                error!(container = %uri, error = %source, "failed to create container");
                return Err(RepositoryError::ContainerCreationFailed {
                    name: name.to_string(),
                    source,
                });
            }
        }

        let handle = Arc::new(ContainerHandle {
            name: name.to_string(),
            uri,
        });
        self.handles
            .write()
            .await
            .insert(name.to_string(), Arc::clone(&handle));
        // Later callers hit the cache, so the guard is no longer needed.
        self.creating.lock().await.remove(name);
        Ok(handle)
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.handles.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::RecordingBackend;
    use futures::future::join_all;
    use std::{sync::atomic::Ordering, time::Duration};

    #[tokio::test]
    async fn concurrent_first_resolutions_create_once() {
        let backend =
            Arc::new(RecordingBackend::new().with_create_delay(Duration::from_millis(20)));
        let registry = Arc::new(ContainerRegistry::new(backend.clone()));

        let tasks = (0..16).map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.resolve("data").await })
        });
        let handles: Vec<Arc<ContainerHandle>> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(backend.creates(), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
        assert_eq!(handles[0].uri.as_str(), "http://127.0.0.1:10000/devstoreaccount1/data");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn slow_creation_does_not_block_other_names() {
        let backend = Arc::new(RecordingBackend::new());
        let release = backend.hold_creates_of("slow");
        let registry = Arc::new(ContainerRegistry::new(backend.clone()));

        let slow = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.resolve("slow").await })
        };
        while backend.creates() == 0 {
            tokio::task::yield_now().await;
        }

        let fast = tokio::time::timeout(Duration::from_secs(5), registry.resolve("fast"))
            .await
            .expect("resolving another name must not wait for the slow create");
        assert_eq!(fast.unwrap().name, "fast");
        assert!(!slow.is_finished());

        release.notify_one();
        assert_eq!(slow.await.unwrap().unwrap().name, "slow");
        assert_eq!(backend.creates(), 2);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn cached_handle_skips_backend() {
        let backend = Arc::new(RecordingBackend::new());
        let registry = ContainerRegistry::new(backend.clone());
        registry.resolve("a").await.unwrap();
        registry.resolve("a").await.unwrap();
        registry.resolve("b").await.unwrap();
        assert_eq!(backend.creates(), 2);
    }

    #[tokio::test]
    async fn creation_failure_is_not_cached() {
        let backend = Arc::new(RecordingBackend::new());
        backend.fail_creates.store(true, Ordering::SeqCst);
        let registry = ContainerRegistry::new(backend.clone());

        assert!(matches!(
            registry.resolve("data").await,
            Err(RepositoryError::ContainerCreationFailed { ref name, .. }) if name == "data"
        ));
        assert_eq!(registry.len().await, 0);

        backend.fail_creates.store(false, Ordering::SeqCst);
        registry.resolve("data").await.unwrap();
        assert_eq!(backend.creates(), 2);
    }
}
