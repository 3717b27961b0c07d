//! Repository facade: virtual-directory CRUD, copy/move and access tokens
//! over a [`StorageBackend`].

use crate::models::{
    blob::{BlobHandle, BlobProperties, DownloadedBlob},
    container::ContainerHandle,
    headers::{HttpHeaders, PropertyBag},
    requests::{HttpHeadersRequest, PropertiesRequest},
    sas::{SasConfiguration, SasPermissions, SasResourceTypes, SasServices, SasToken},
};
use crate::services::{
    address::{BlobLocation, resolve_in_directory, resolve_key},
    backend::{BackendError, ByteStream, CopyOperation, CopyWaitError, StorageBackend},
    error::{RepositoryError, RepositoryResult},
    options::{RepositoryOptions, StorageOptions},
    projector::project,
    registry::ContainerRegistry,
    sas::{AccessTokenIssuer, SasIssueError, SasScope},
};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt};
use std::{io::SeekFrom, sync::Arc};
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt};
use tokio_util::{io::ReaderStream, sync::CancellationToken};
use tracing::{debug, error, info, warn};
use url::Url;

/// Per-call upload settings.
#[derive(Clone, Copy, Debug)]
pub struct UploadOptions<'a> {
    /// Prefix the name with the repository's virtual path.
    pub use_virtual_directory: bool,
    pub metadata: Option<&'a PropertyBag>,
    pub headers: Option<&'a HttpHeaders>,
}

impl Default for UploadOptions<'_> {
    fn default() -> Self {
        Self {
            use_virtual_directory: true,
            metadata: None,
            headers: None,
        }
    }
}

/// A server-side copy into the active container.
#[derive(Clone, Debug)]
pub struct CopySpec {
    /// Blob uri of the source, optionally carrying a SAS query.
    pub source: Url,
    pub target_name: String,
    pub target_virtual_path: Option<String>,
    /// Replaces the source metadata when set.
    pub metadata: Option<PropertyBag>,
    /// Applied to the target after the copy completed.
    pub headers: Option<HttpHeaders>,
}

impl CopySpec {
    pub fn new(source: Url, target_name: impl Into<String>) -> Self {
        Self {
            source,
            target_name: target_name.into(),
            target_virtual_path: None,
            metadata: None,
            headers: None,
        }
    }
}

/// A move between two containers of the same account.
#[derive(Clone, Debug, Default)]
pub struct ContainerMove {
    pub source_container: String,
    pub target_container: String,
    pub source_name: String,
    pub target_name: String,
    pub source_virtual_path: Option<String>,
    pub target_virtual_path: Option<String>,
    /// Named properties of the source to keep as target metadata. The source
    /// metadata is carried over unchanged when unset.
    pub properties: Option<Vec<String>>,
}

struct Shared {
    backend: Arc<dyn StorageBackend>,
    options: Arc<dyn StorageOptions>,
    registry: ContainerRegistry,
}

/// A view of one storage account with an active container and an optional
/// virtual root.
///
/// Clones and [`Repository::with_container`] views share the container
/// registry.
#[derive(Clone)]
pub struct Repository {
    shared: Arc<Shared>,
    active: Option<Arc<ContainerHandle>>,
    virtual_path: Option<String>,
}

impl Repository {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        options: Arc<dyn StorageOptions>,
        virtual_path: Option<String>,
    ) -> Self {
        let registry = ContainerRegistry::new(Arc::clone(&backend));
        Self {
            shared: Arc::new(Shared {
                backend,
                options,
                registry,
            }),
            active: None,
            virtual_path,
        }
    }

    /// Build a repository and activate the configured initial container.
    pub async fn open(
        backend: Arc<dyn StorageBackend>,
        options: Arc<dyn StorageOptions>,
        repository: RepositoryOptions,
    ) -> RepositoryResult<Self> {
        let mut repo = Self::new(backend, options, repository.virtual_path);
        if let Some(name) = repository.initial_container.as_deref() {
            repo.set_active_container(name).await?;
        }
        Ok(repo)
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.shared.backend
    }

    pub fn virtual_path(&self) -> Option<&str> {
        self.virtual_path.as_deref()
    }

    pub fn active_container(&self) -> Option<&Arc<ContainerHandle>> {
        self.active.as_ref()
    }

    /// Make `name` the active container, creating it if needed.
    pub async fn set_active_container(&mut self, name: &str) -> RepositoryResult<Arc<ContainerHandle>> {
        let handle = self.shared.registry.resolve(name).await?;
        self.active = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// A view on another container sharing this repository's cache.
    pub async fn with_container(&self, name: &str) -> RepositoryResult<Repository> {
        let mut view = self.clone();
        view.set_active_container(name).await?;
        Ok(view)
    }

    fn container(&self) -> RepositoryResult<&Arc<ContainerHandle>> {
        self.active.as_ref().ok_or(RepositoryError::NoActiveContainer)
    }

    fn key(&self, name: &str, use_virtual_directory: bool) -> String {
        resolve_key(self.virtual_path.as_deref(), name, use_virtual_directory)
    }

    fn handle(&self, container: &str, key: &str) -> BlobHandle {
        BlobHandle {
            container: container.to_string(),
            key: key.to_string(),
            uri: self.shared.backend.endpoint().blob_uri(container, key),
        }
    }

    fn locate(&self, uri: &Url) -> RepositoryResult<BlobLocation> {
        self.shared
            .backend
            .endpoint()
            .locate(uri)
            .ok_or_else(|| RepositoryError::InvalidUri(uri.to_string()))
    }

    /// Upload a seekable source, rewinding it first.
    ///
    /// Pass the reader by value to have it dropped after the upload, or as
    /// `&mut` to keep using it.
    pub async fn upload<R>(
        &self,
        name: &str,
        mut reader: R,
        options: UploadOptions<'_>,
    ) -> RepositoryResult<BlobHandle>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        reader.seek(SeekFrom::Start(0)).await?;
        self.upload_stream(name, ReaderStream::new(reader).boxed(), options)
            .await
    }

    /// Upload a payload stream as `name`, overwriting any existing blob.
    pub async fn upload_stream(
        &self,
        name: &str,
        body: ByteStream<'_>,
        options: UploadOptions<'_>,
    ) -> RepositoryResult<BlobHandle> {
        let container = self.container()?;
        let key = self.key(name, options.use_virtual_directory);

        self.shared
            .backend
            .upload(&container.name, &key, body, options.headers, options.metadata)
            .await
            .map_err(|err| {
                error!(blob = %key, container = %container.uri, error = %err, "upload failed");
                RepositoryError::backend(format!("uploading `{}`", key), err)
            })?;
        Ok(self.handle(&container.name, &key))
    }

    async fn download_located(
        &self,
        location: &BlobLocation,
        properties: &[impl AsRef<str> + Sync],
    ) -> RepositoryResult<Option<DownloadedBlob>> {
        let backend = &self.shared.backend;
        let context = || format!("reading `{}/{}`", location.container, location.key);

        if !backend
            .exists(&location.container, &location.key)
            .await
            .map_err(|err| RepositoryError::backend(context(), err))?
        {
            return Ok(None);
        }

        let body = match backend.download(&location.container, &location.key).await {
            Ok(body) => body,
            Err(BackendError::BlobNotFound { .. }) => return Ok(None),
            Err(err) => {
                error!(blob = %location.key, container = %location.container, error = %err, "download failed");
                return Err(RepositoryError::backend(context(), err));
            }
        };
        let content = read_all(body).await?;
        let properties = if properties.is_empty() {
            PropertyBag::new()
        } else {
            backend
                .get_properties(&location.container, &location.key)
                .await
                .map_err(|err| RepositoryError::backend(context(), err))?
                .select(properties)
        };
        Ok(Some(DownloadedBlob {
            content,
            properties,
        }))
    }

    /// Download `name` with the requested named properties, `None` if absent.
    pub async fn get(
        &self,
        name: &str,
        use_virtual_directory: bool,
        properties: &[impl AsRef<str> + Sync],
    ) -> RepositoryResult<Option<DownloadedBlob>> {
        let container = self.container()?;
        let location = BlobLocation {
            container: container.name.clone(),
            key: self.key(name, use_virtual_directory),
        };
        self.download_located(&location, properties).await
    }

    pub async fn get_by_uri(
        &self,
        uri: &Url,
        properties: &[impl AsRef<str> + Sync],
    ) -> RepositoryResult<Option<DownloadedBlob>> {
        let location = self.locate(uri)?;
        self.download_located(&location, properties).await
    }

    async fn describe_located(
        &self,
        location: &BlobLocation,
        properties: &[impl AsRef<str> + Sync],
    ) -> RepositoryResult<Option<(BlobHandle, PropertyBag)>> {
        let context = || format!("reading properties of `{}/{}`", location.container, location.key);
        match self
            .shared
            .backend
            .get_properties(&location.container, &location.key)
            .await
        {
            Ok(props) => Ok(Some((
                self.handle(&location.container, &location.key),
                props.select(properties),
            ))),
            Err(BackendError::BlobNotFound { .. } | BackendError::ContainerNotFound(_)) => Ok(None),
            Err(err) => Err(RepositoryError::backend(context(), err)),
        }
    }

    /// Handle and named properties of `name` without downloading it.
    pub async fn get_blob(
        &self,
        name: &str,
        use_virtual_directory: bool,
        properties: &[impl AsRef<str> + Sync],
    ) -> RepositoryResult<Option<(BlobHandle, PropertyBag)>> {
        let container = self.container()?;
        let location = BlobLocation {
            container: container.name.clone(),
            key: self.key(name, use_virtual_directory),
        };
        self.describe_located(&location, properties).await
    }

    pub async fn get_blob_by_uri(
        &self,
        uri: &Url,
        properties: &[impl AsRef<str> + Sync],
    ) -> RepositoryResult<Option<(BlobHandle, PropertyBag)>> {
        let location = self.locate(uri)?;
        self.describe_located(&location, properties).await
    }

    /// All properties of `name`, `None` if absent.
    pub async fn properties(
        &self,
        name: &str,
        use_virtual_directory: bool,
    ) -> RepositoryResult<Option<BlobProperties>> {
        let container = self.container()?;
        let key = self.key(name, use_virtual_directory);
        match self.shared.backend.get_properties(&container.name, &key).await {
            Ok(props) => Ok(Some(props)),
            Err(BackendError::BlobNotFound { .. } | BackendError::ContainerNotFound(_)) => Ok(None),
            Err(err) => Err(RepositoryError::backend(
                format!("reading properties of `{}`", key),
                err,
            )),
        }
    }

    /// Whether the fully resolved key exists in the active container.
    pub async fn exists(&self, full_name: &str) -> RepositoryResult<bool> {
        let container = self.container()?;
        self.shared
            .backend
            .exists(&container.name, full_name)
            .await
            .map_err(|err| RepositoryError::backend(format!("checking `{}`", full_name), err))
    }

    async fn delete_located(&self, location: &BlobLocation) -> RepositoryResult<bool> {
        self.shared
            .backend
            .delete_if_exists(&location.container, &location.key)
            .await
            .map_err(|err| {
                error!(blob = %location.key, container = %location.container, error = %err, "delete failed");
                RepositoryError::backend(format!("deleting `{}`", location.key), err)
            })
    }

    /// Delete `name`. Returns `false` when there was nothing to delete.
    pub async fn delete(&self, name: &str, use_virtual_directory: bool) -> RepositoryResult<bool> {
        let container = self.container()?;
        self.delete_located(&BlobLocation {
            container: container.name.clone(),
            key: self.key(name, use_virtual_directory),
        })
        .await
    }

    pub async fn delete_by_uri(&self, uri: &Url) -> RepositoryResult<bool> {
        let location = self.locate(uri)?;
        self.delete_located(&location).await
    }

    /// Delete every live blob under `prefix`.
    ///
    /// Per-item failures are logged and skipped. Returns the number of blobs
    /// deleted.
    pub async fn delete_directory(
        &self,
        prefix: &str,
        use_virtual_directory: bool,
        cancel: &CancellationToken,
    ) -> RepositoryResult<usize> {
        let container = self.container()?;
        let prefix = self.key(prefix, use_virtual_directory);
        let backend = &self.shared.backend;

        let mut listing = backend.list(&container.name, &prefix);
        let mut deleted = 0;
        while let Some(item) = listing.next().await {
            if cancel.is_cancelled() {
                return Err(RepositoryError::Cancelled);
            }
            let item = match item {
                Ok(item) if item.deleted => continue,
                Ok(item) => item,
                Err(BackendError::ContainerNotFound(_)) => break,
                Err(err) => {
                    warn!(container = %container.uri, error = %err, "skipping unreadable listing entry");
                    continue;
                }
            };
            match backend.delete_if_exists(&container.name, &item.name).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(err) => warn!(blob = %item.name, container = %container.uri, error = %err, "unable to delete blob"),
            }
        }
        Ok(deleted)
    }

    /// Live blobs under `prefix`.
    pub async fn list(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Vec<BlobHandle>> {
        self.list_where(prefix, |_| true, cancel).await
    }

    /// Live blobs under `prefix` whose properties satisfy `predicate`.
    ///
    /// `prefix` is used verbatim. Entries whose properties cannot be read are
    /// logged and skipped.
    pub async fn list_where<P>(
        &self,
        prefix: &str,
        predicate: P,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Vec<BlobHandle>>
    where
        P: Fn(&BlobProperties) -> bool + Send + Sync,
    {
        let container = self.container()?;
        let mut listing = self.shared.backend.list(&container.name, prefix);
        let mut handles = Vec::new();
        while let Some(item) = listing.next().await {
            if cancel.is_cancelled() {
                return Err(RepositoryError::Cancelled);
            }
            match item {
                Ok(item) if !item.deleted && predicate(&item.properties) => {
                    handles.push(self.handle(&container.name, &item.name));
                }
                Ok(_) => {}
                Err(err @ BackendError::ContainerNotFound(_)) => {
                    return Err(RepositoryError::backend("listing blobs", err));
                }
                Err(err) => {
                    warn!(container = %container.uri, error = %err, "skipping unreadable listing entry");
                }
            }
        }
        Ok(handles)
    }

    async fn wait_for_copy(
        mut operation: CopyOperation,
        target: &str,
        cancel: &CancellationToken,
    ) -> RepositoryResult<()> {
        operation
            .wait_for_completion(cancel)
            .await
            .map_err(|err| match err {
                CopyWaitError::Cancelled => RepositoryError::Cancelled,
                CopyWaitError::Failed(reason) => RepositoryError::CopyFailed {
                    target: target.to_string(),
                    reason,
                },
            })
    }

    /// Whether both repositories address the same storage account.
    fn same_account(&self, other: &Repository) -> bool {
        self.shared.backend.endpoint() == other.shared.backend.endpoint()
    }

    /// Copy `copy.source` into the active container.
    ///
    /// A source of this account must exist, otherwise the copy fails with
    /// [`RepositoryError::SourceNotFound`]. A uri of another account is
    /// handed to the backend as is and has to carry its own SAS query.
    /// Returns the target uri once the copy completed and the headers were
    /// applied.
    pub async fn copy(&self, copy: CopySpec, cancel: &CancellationToken) -> RepositoryResult<Url> {
        let owner = self.locate(&copy.source).is_ok().then_some(self);
        self.copy_from_owner(owner, copy, cancel).await
    }

    /// Copy a blob served by `owner`, or by an account only the backend can
    /// reach when `owner` is `None`.
    async fn copy_from_owner(
        &self,
        owner: Option<&Repository>,
        copy: CopySpec,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Url> {
        let container = self.container()?;
        let backend = &self.shared.backend;
        let key = resolve_in_directory(copy.target_virtual_path.as_deref(), &copy.target_name);
        let target = self.handle(&container.name, &key);

        let started = match owner {
            Some(owner) => {
                let location = owner.locate(&copy.source)?;
                let source_backend = &owner.shared.backend;
                let source_exists = source_backend
                    .exists(&location.container, &location.key)
                    .await
                    .map_err(|err| {
                        RepositoryError::backend(format!("checking `{}`", location.key), err)
                    })?;
                if !source_exists {
                    warn!(source = %copy.source, "copy source does not exist");
                    return Err(RepositoryError::SourceNotFound(copy.source.to_string()));
                }

                if self.same_account(owner) {
                    backend
                        .start_copy_from_uri(&copy.source, &container.name, &key, copy.metadata.as_ref())
                        .await
                } else {
                    backend
                        .copy_from(
                            &**source_backend,
                            &location,
                            &container.name,
                            &key,
                            copy.metadata.as_ref(),
                        )
                        .await
                }
            }
            None => {
                backend
                    .start_copy_from_uri(&copy.source, &container.name, &key, copy.metadata.as_ref())
                    .await
            }
        };
        let operation = started.map_err(|err| {
            error!(blob = %key, container = %container.uri, error = %err, "copy failed to start");
            match err {
                BackendError::UnsupportedSource(uri) => RepositoryError::InvalidUri(uri),
                err => RepositoryError::backend(format!("copying into `{}`", key), err),
            }
        })?;
        Self::wait_for_copy(operation, target.uri.as_str(), cancel).await?;

        if let Some(headers) = copy.headers.as_ref().filter(|h| !h.is_empty()) {
            backend
                .set_http_headers(&container.name, &key, headers)
                .await
                .map_err(|err| RepositoryError::backend(format!("setting headers of `{}`", key), err))?;
        }
        info!(source = %copy.source, target = %target.uri, "copied blob");
        Ok(target.uri)
    }

    /// Copy with metadata and headers projected from the source.
    pub async fn copy_with_requests(
        &self,
        source: Url,
        target_name: &str,
        target_virtual_path: Option<&str>,
        properties: Option<&PropertiesRequest>,
        headers: Option<&HttpHeadersRequest>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Url> {
        self.copy_projected(self, source, target_name, target_virtual_path, properties, headers, cancel)
            .await
    }

    /// Project the requests from the source as seen by `owner`, then copy.
    #[allow(clippy::too_many_arguments)]
    async fn copy_projected(
        &self,
        owner: &Repository,
        source: Url,
        target_name: &str,
        target_virtual_path: Option<&str>,
        properties: Option<&PropertiesRequest>,
        headers: Option<&HttpHeadersRequest>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Url> {
        let location = owner.locate(&source)?;
        let backend = &owner.shared.backend;
        let source_text = source.to_string();

        let projection = project(properties, headers, |names| async move {
            match backend.get_properties(&location.container, &location.key).await {
                Ok(props) => Ok(props.select(names.as_slice())),
                Err(BackendError::BlobNotFound { .. } | BackendError::ContainerNotFound(_)) => {
                    Err(RepositoryError::SourceNotFound(source_text))
                }
                Err(err) => Err(RepositoryError::backend(
                    format!("reading properties of `{}`", location.key),
                    err,
                )),
            }
        })
        .await?;

        let mut copy = CopySpec::new(source, target_name);
        copy.target_virtual_path = target_virtual_path.map(str::to_string);
        copy.metadata = projection.metadata;
        copy.headers = projection.headers.as_ref().map(HttpHeaders::from_map);
        self.copy_from_owner(Some(owner), copy, cancel).await
    }

    /// Copy then delete the source once the copy completed.
    ///
    /// A missing source is logged and yields `None` without touching the
    /// target.
    async fn move_blob(
        &self,
        source: BlobLocation,
        target_container: &ContainerHandle,
        target_key: String,
        properties: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Option<Url>> {
        let backend = &self.shared.backend;
        let source_uri = backend.endpoint().blob_uri(&source.container, &source.key);
        let target_uri = backend.endpoint().blob_uri(&target_container.name, &target_key);
        let context = |what: &str| format!("{} `{}`", what, source.key);

        if !backend
            .exists(&source.container, &source.key)
            .await
            .map_err(|err| RepositoryError::backend(context("checking"), err))?
        {
            warn!(source = %source_uri, target = %target_uri, "unable to move blob, source does not exist");
            return Ok(None);
        }
        if source.container == target_container.name && source.key == target_key {
            debug!(blob = %source_uri, "source and target are the same blob, nothing to move");
            return Ok(Some(target_uri));
        }

        let metadata = match properties {
            Some(names) => Some(
                backend
                    .get_properties(&source.container, &source.key)
                    .await
                    .map_err(|err| RepositoryError::backend(context("reading properties of"), err))?
                    .select(names),
            ),
            None => None,
        };

        let operation = backend
            .start_copy_from_uri(&source_uri, &target_container.name, &target_key, metadata.as_ref())
            .await
            .map_err(|err| {
                error!(blob = %target_key, container = %target_container.uri, error = %err, "move failed to start");
                RepositoryError::backend(context("moving"), err)
            })?;
        Self::wait_for_copy(operation, target_uri.as_str(), cancel).await?;

        backend
            .delete_if_exists(&source.container, &source.key)
            .await
            .map_err(|err| RepositoryError::backend(context("deleting moved"), err))?;
        info!(source = %source_uri, target = %target_uri, "moved blob");
        Ok(Some(target_uri))
    }

    /// Move `name` into (`to_virtual_directory`) or out of the virtual root.
    pub async fn move_within(
        &self,
        name: &str,
        to_virtual_directory: bool,
        properties: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Option<Url>> {
        let container = self.container()?;
        let source = BlobLocation {
            container: container.name.clone(),
            key: self.key(name, !to_virtual_directory),
        };
        let target_key = self.key(name, to_virtual_directory);
        self.move_blob(source, container, target_key, properties, cancel)
            .await
    }

    /// Move `name` to `{directory}/{name}` in the active container.
    pub async fn move_to_directory(
        &self,
        name: &str,
        directory: &str,
        source_in_virtual_directory: bool,
        properties: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Option<Url>> {
        let container = self.container()?;
        let source = BlobLocation {
            container: container.name.clone(),
            key: self.key(name, source_in_virtual_directory),
        };
        let target_key = resolve_in_directory(Some(directory), name);
        self.move_blob(source, container, target_key, properties, cancel)
            .await
    }

    /// Move a blob between two containers, creating either if needed.
    pub async fn move_between_containers(
        &self,
        request: &ContainerMove,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Option<Url>> {
        let source_container = self.shared.registry.resolve(&request.source_container).await?;
        let target_container = self.shared.registry.resolve(&request.target_container).await?;
        let source = BlobLocation {
            container: source_container.name.clone(),
            key: resolve_in_directory(request.source_virtual_path.as_deref(), &request.source_name),
        };
        let target_key =
            resolve_in_directory(request.target_virtual_path.as_deref(), &request.target_name);
        self.move_blob(
            source,
            &target_container,
            target_key,
            request.properties.as_deref(),
            cancel,
        )
        .await
    }

    /// Copy `source_uri`, a blob of `source`, into `target`'s active
    /// container. The two repositories may belong to different accounts.
    #[allow(clippy::too_many_arguments)]
    pub async fn copy_between(
        source: &Repository,
        target: &Repository,
        source_uri: Url,
        target_name: &str,
        target_virtual_path: Option<&str>,
        properties: Option<&PropertiesRequest>,
        headers: Option<&HttpHeadersRequest>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Url> {
        target
            .copy_projected(source, source_uri, target_name, target_virtual_path, properties, headers, cancel)
            .await
    }

    /// Copy `source_uri` into `target`, then delete it through `source`.
    ///
    /// Cancellation observed after the copy skips the delete and yields
    /// [`RepositoryError::Cancelled`]; the target keeps its copy. A missing
    /// source is logged and yields `None`. A target that is the source blob
    /// itself is left untouched.
    #[allow(clippy::too_many_arguments)]
    pub async fn move_between(
        source: &Repository,
        target: &Repository,
        source_uri: Url,
        target_name: &str,
        target_virtual_path: Option<&str>,
        properties: Option<&PropertiesRequest>,
        headers: Option<&HttpHeadersRequest>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<Option<Url>> {
        let location = source.locate(&source_uri)?;
        let target_container = target.container()?;
        let target_key = resolve_in_directory(target_virtual_path, target_name);
        if source.same_account(target)
            && location.container == target_container.name
            && location.key == target_key
        {
            let exists = source
                .shared
                .backend
                .exists(&location.container, &location.key)
                .await
                .map_err(|err| RepositoryError::backend(format!("checking `{}`", location.key), err))?;
            debug!(blob = %source_uri, exists, "source and target are the same blob, nothing to move");
            return Ok(exists.then(|| target.handle(&location.container, &location.key).uri));
        }

        let copied = match Self::copy_between(
            source,
            target,
            source_uri.clone(),
            target_name,
            target_virtual_path,
            properties,
            headers,
            cancel,
        )
        .await
        {
            Ok(uri) => uri,
            Err(RepositoryError::SourceNotFound(_)) => {
                warn!(source = %source_uri, "unable to move blob, source does not exist");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        if cancel.is_cancelled() {
            warn!(source = %source_uri, target = %copied, "move cancelled after copy, source kept");
            return Err(RepositoryError::Cancelled);
        }
        source.delete_located(&location).await?;
        Ok(Some(copied))
    }

    fn issuer(&self) -> RepositoryResult<AccessTokenIssuer> {
        Ok(AccessTokenIssuer::new(self.shared.options.credential()?))
    }

    fn issue(
        &self,
        configuration: &SasConfiguration,
        scope: SasScope,
        permissions: SasPermissions,
        resource_types: SasResourceTypes,
        services: SasServices,
        uri: Url,
    ) -> RepositoryResult<SasToken> {
        self.issuer()?
            .issue(
                self.shared.backend.as_ref(),
                configuration,
                scope,
                permissions,
                resource_types,
                services,
                uri,
            )
            .map_err(|err| match err {
                SasIssueError::InvalidConfiguration(reason) => {
                    RepositoryError::InvalidSasConfiguration(reason.to_string())
                }
                SasIssueError::Signing(err) => RepositoryError::backend("signing access token", err),
            })
    }

    /// Token valid for the whole account.
    pub fn create_account_sas(
        &self,
        configuration: &SasConfiguration,
        permissions: SasPermissions,
        resource_types: SasResourceTypes,
        services: SasServices,
    ) -> RepositoryResult<SasToken> {
        let uri = self.shared.backend.endpoint().url().clone();
        self.issue(configuration, SasScope::Account, permissions, resource_types, services, uri)
    }

    async fn sas_container(&self, configuration: &SasConfiguration) -> RepositoryResult<Arc<ContainerHandle>> {
        if configuration.container_name.is_empty() {
            return self.container().cloned();
        }
        self.shared.registry.resolve(&configuration.container_name).await
    }

    /// Token scoped to the configured container (the active one when the
    /// configuration names none). The container is created if missing.
    pub async fn create_container_sas(
        &self,
        configuration: &SasConfiguration,
        permissions: SasPermissions,
        resource_types: SasResourceTypes,
        services: SasServices,
    ) -> RepositoryResult<SasToken> {
        let container = self.sas_container(configuration).await?;
        self.issue(
            configuration,
            SasScope::Container(container.name.clone()),
            permissions,
            resource_types,
            services,
            container.uri.clone(),
        )
    }

    /// Token scoped to one blob, `None` when the blob does not exist.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_blob_sas(
        &self,
        name: &str,
        virtual_path: Option<&str>,
        configuration: &SasConfiguration,
        permissions: SasPermissions,
        resource_types: SasResourceTypes,
        services: SasServices,
    ) -> RepositoryResult<Option<SasToken>> {
        let container = self.sas_container(configuration).await?;
        let key = resolve_in_directory(virtual_path, name);
        let exists = self
            .shared
            .backend
            .exists(&container.name, &key)
            .await
            .map_err(|err| RepositoryError::backend(format!("checking `{}`", key), err))?;
        if !exists {
            return Ok(None);
        }

        let uri = self.shared.backend.endpoint().blob_uri(&container.name, &key);
        self.issue(
            configuration,
            SasScope::Blob {
                container: container.name.clone(),
                key,
            },
            permissions,
            resource_types,
            services,
            uri,
        )
        .map(Some)
    }
}

async fn read_all(body: ByteStream<'_>) -> RepositoryResult<Bytes> {
    let buffer = body
        .try_fold(BytesMut::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await?;
    Ok(buffer.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::headers::{HeaderMap, names};
    use crate::services::{
        memory_backend::MemoryBackend,
        options::StorageAccountOptions,
        test_support::{ENDPOINT, RecordingBackend},
    };
    use crate::services::address::ServiceEndpoint;
    use chrono::{Duration as ChronoDuration, Utc};
    use futures::stream;
    use std::{io::Cursor, time::Duration};

    async fn repository_on(backend: Arc<RecordingBackend>) -> Repository {
        Repository::open(
            backend,
            Arc::new(StorageAccountOptions::development()),
            RepositoryOptions {
                initial_container: Some("data".into()),
                virtual_path: Some("root/".into()),
            },
        )
        .await
        .unwrap()
    }

    async fn repository() -> (Repository, Arc<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend::new());
        (repository_on(backend.clone()).await, backend)
    }

    fn body(data: &'static [u8]) -> ByteStream<'static> {
        stream::once(async move { Ok(Bytes::from_static(data)) }).boxed()
    }

    fn bag(pairs: &[(&str, &str)]) -> PropertyBag {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn sas_configuration(container: &str) -> SasConfiguration {
        SasConfiguration {
            valid_from_in_minutes: 5,
            valid_for_in_minutes: 60,
            clock_skew_in_minutes: 5,
            container_name: container.into(),
        }
    }

    const NO_PROPS: &[&str] = &[];

    #[tokio::test]
    async fn upload_then_get_round_trips_under_virtual_root() {
        let (repo, backend) = repository().await;
        let metadata = bag(&[("origin", "rki")]);
        let handle = repo
            .upload_stream(
                "districts.json",
                body(b"[1,2]"),
                UploadOptions {
                    metadata: Some(&metadata),
                    headers: Some(&HttpHeaders::with_content_type("application/json")),
                    ..UploadOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(handle.key, "root/districts.json");
        assert_eq!(handle.uri.as_str(), format!("{}/data/root/districts.json", ENDPOINT));

        let blob = repo
            .get("districts.json", true, &["ContentType", "origin", "CacheControl"])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(blob.content, Bytes::from_static(b"[1,2]"));
        assert_eq!(blob.properties, bag(&[("ContentType", "application/json"), ("origin", "rki")]));

        let by_uri = repo.get_by_uri(&handle.uri, NO_PROPS).await.unwrap().unwrap();
        assert_eq!(by_uri.content, blob.content);
        assert!(repo.get("districts.json", false, NO_PROPS).await.unwrap().is_none());
        assert_eq!(backend.uploads(), 1);
    }

    #[tokio::test]
    async fn upload_rewinds_seekable_sources() {
        let (repo, _) = repository().await;
        let mut cursor = Cursor::new(b"abcdef".to_vec());
        cursor.set_position(4);

        repo.upload("kept", &mut cursor, UploadOptions::default()).await.unwrap();
        cursor.set_position(0);
        repo.upload("owned", cursor, UploadOptions::default()).await.unwrap();

        for name in ["kept", "owned"] {
            let blob = repo.get(name, true, NO_PROPS).await.unwrap().unwrap();
            assert_eq!(blob.content, Bytes::from_static(b"abcdef"));
        }
    }

    #[tokio::test]
    async fn get_and_delete_signal_absence() {
        let (repo, _) = repository().await;
        assert!(repo.get("missing", true, NO_PROPS).await.unwrap().is_none());
        assert!(repo.get_blob("missing", true, NO_PROPS).await.unwrap().is_none());
        assert!(!repo.delete("missing", true).await.unwrap());

        repo.upload_stream("x", body(b"1"), UploadOptions::default()).await.unwrap();
        let (handle, props) = repo.get_blob("x", true, &["ContentLength"]).await.unwrap().unwrap();
        assert_eq!(props["ContentLength"], "1");
        assert!(repo.exists("root/x").await.unwrap());

        assert!(repo.delete_by_uri(&handle.uri).await.unwrap());
        assert!(!repo.delete("x", true).await.unwrap());
        assert!(!repo.exists("root/x").await.unwrap());
    }

    #[tokio::test]
    async fn foreign_uri_is_rejected() {
        let (repo, _) = repository().await;
        let foreign = Url::parse("https://elsewhere.example/data/x").unwrap();
        assert!(matches!(
            repo.get_by_uri(&foreign, NO_PROPS).await,
            Err(RepositoryError::InvalidUri(_))
        ));
    }

    #[tokio::test]
    async fn operations_need_an_active_container() {
        let repo = Repository::new(
            Arc::new(RecordingBackend::new()),
            Arc::new(StorageAccountOptions::development()),
            None,
        );
        assert!(matches!(
            repo.upload_stream("x", body(b"1"), UploadOptions::default()).await,
            Err(RepositoryError::NoActiveContainer)
        ));
    }

    #[tokio::test]
    async fn views_share_the_container_cache() {
        let (repo, backend) = repository().await;
        let archive = repo.with_container("archive").await.unwrap();
        let again = repo.with_container("archive").await.unwrap();
        assert!(Arc::ptr_eq(
            archive.active_container().unwrap(),
            again.active_container().unwrap()
        ));
        assert_eq!(backend.creates(), 2);
    }

    #[tokio::test]
    async fn list_skips_deleted_and_applies_predicate() {
        let (repo, _) = repository().await;
        let json = HttpHeaders::with_content_type("application/json");
        for name in ["a.json", "b.json", "c.txt"] {
            let headers = name.ends_with(".json").then_some(&json);
            repo.upload_stream(name, body(b"x"), UploadOptions { headers, ..UploadOptions::default() })
                .await
                .unwrap();
        }
        repo.delete("b.json", true).await.unwrap();
        let cancel = CancellationToken::new();

        let all = repo.list("root/", &cancel).await.unwrap();
        assert_eq!(
            all.iter().map(|h| h.key.as_str()).collect::<Vec<_>>(),
            vec!["root/a.json", "root/c.txt"]
        );

        let json_only = repo
            .list_where(
                "root/",
                |props| props.http_headers.content_type.as_deref() == Some("application/json"),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(json_only.len(), 1);
        assert_eq!(json_only[0].key, "root/a.json");
    }

    #[tokio::test]
    async fn delete_directory_counts_deleted_blobs() {
        let (repo, _) = repository().await;
        for name in ["dir/1", "dir/2", "other"] {
            repo.upload_stream(name, body(b"x"), UploadOptions::default()).await.unwrap();
        }
        let cancel = CancellationToken::new();
        assert_eq!(repo.delete_directory("dir/", true, &cancel).await.unwrap(), 2);
        assert_eq!(repo.delete_directory("dir/", true, &cancel).await.unwrap(), 0);
        assert!(repo.exists("root/other").await.unwrap());

        cancel.cancel();
        assert!(matches!(
            repo.delete_directory("", false, &cancel).await,
            Err(RepositoryError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn copy_of_missing_source_fails() {
        let (repo, backend) = repository().await;
        let source = repo.backend().endpoint().blob_uri("data", "nope");
        assert!(matches!(
            repo.copy(CopySpec::new(source, "target"), &CancellationToken::new()).await,
            Err(RepositoryError::SourceNotFound(_))
        ));
        assert_eq!(backend.copies(), 0);
    }

    #[tokio::test]
    async fn copy_with_requests_projects_metadata_and_headers() {
        let (repo, _) = repository().await;
        let source = repo
            .upload_stream(
                "src.json",
                body(b"{}"),
                UploadOptions {
                    metadata: Some(&bag(&[("a", "1"), ("b", "2")])),
                    headers: Some(&HttpHeaders::with_content_type("application/json")),
                    ..UploadOptions::default()
                },
            )
            .await
            .unwrap();

        let properties = PropertiesRequest {
            take_from_source: vec!["a".into(), "b".into(), "c".into()],
            values_to_add: bag(&[("b", "9")]),
        };
        let mut header_values = HeaderMap::new();
        header_values.insert(names::CACHE_CONTROL.into(), "max-age=60".into());
        let headers = HttpHeadersRequest {
            take_from_source: vec![names::CONTENT_TYPE.into()],
            values_to_add: header_values,
        };

        let target = repo
            .copy_with_requests(
                source.uri,
                "dst.json",
                Some("archive"),
                Some(&properties),
                Some(&headers),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(target.as_str().ends_with("/data/archive/dst.json"));

        let props = repo.backend().get_properties("data", "archive/dst.json").await.unwrap();
        assert_eq!(props.metadata, bag(&[("a", "1"), ("b", "9")]));
        assert_eq!(props.http_headers.content_type.as_deref(), Some("application/json"));
        assert_eq!(props.http_headers.cache_control.as_deref(), Some("max-age=60"));
    }

    #[tokio::test]
    async fn move_of_missing_source_is_a_no_op() {
        let (repo, backend) = repository().await;
        let cancel = CancellationToken::new();
        assert_eq!(repo.move_within("ghost", true, None, &cancel).await.unwrap(), None);
        assert_eq!(
            repo.move_to_directory("ghost", "archive", true, None, &cancel).await.unwrap(),
            None
        );
        assert_eq!(backend.copies(), 0);
        assert_eq!(backend.deletes(), 0);
    }

    #[tokio::test]
    async fn move_within_toggles_virtual_root() {
        let (repo, _) = repository().await;
        repo.upload_stream("f.json", body(b"x"), UploadOptions { use_virtual_directory: false, ..UploadOptions::default() })
            .await
            .unwrap();

        let moved = repo
            .move_within("f.json", true, None, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(moved.as_str().ends_with("/data/root/f.json"));
        assert!(!repo.exists("f.json").await.unwrap());
        assert!(repo.exists("root/f.json").await.unwrap());
    }

    #[tokio::test]
    async fn move_between_containers_keeps_selected_properties() {
        let (repo, _) = repository().await;
        repo.upload_stream(
            "f",
            body(b"x"),
            UploadOptions {
                use_virtual_directory: false,
                metadata: Some(&bag(&[("keep", "1"), ("drop", "2")])),
                headers: None,
            },
        )
        .await
        .unwrap();

        let request = ContainerMove {
            source_container: "data".into(),
            target_container: "archive".into(),
            source_name: "f".into(),
            target_name: "g".into(),
            target_virtual_path: Some("2020/".into()),
            properties: Some(vec!["keep".into()]),
            ..ContainerMove::default()
        };
        let moved = repo
            .move_between_containers(&request, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.as_str(), format!("{}/archive/2020/g", ENDPOINT));

        let props = repo.backend().get_properties("archive", "2020/g").await.unwrap();
        assert_eq!(props.metadata, bag(&[("keep", "1")]));
        assert!(!repo.backend().exists("data", "f").await.unwrap());
    }

    #[tokio::test]
    async fn two_step_move_deletes_once_copy_completed_even_if_cancelled() {
        let (repo, _) = repository().await;
        repo.upload_stream("f", body(b"x"), UploadOptions::default()).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let moved = repo.move_within("f", false, None, &cancel).await.unwrap();
        assert!(moved.is_some());
        assert!(!repo.exists("root/f").await.unwrap());
        assert!(repo.exists("f").await.unwrap());
    }

    #[tokio::test]
    async fn two_step_move_cancelled_while_pending_keeps_source() {
        let inner = MemoryBackend::new(ServiceEndpoint::parse(ENDPOINT).unwrap())
            .with_copy_latency(Duration::from_secs(30));
        let backend = Arc::new(RecordingBackend::wrapping(inner));
        let repo = repository_on(backend.clone()).await;
        repo.upload_stream("f", body(b"x"), UploadOptions::default()).await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        assert!(matches!(
            repo.move_within("f", false, None, &cancel).await,
            Err(RepositoryError::Cancelled)
        ));
        assert!(repo.exists("root/f").await.unwrap());
        assert_eq!(backend.deletes(), 0);
    }

    #[tokio::test]
    async fn three_party_move_skips_delete_when_cancelled() {
        let (source_repo, backend) = repository().await;
        let target_repo = source_repo.with_container("archive").await.unwrap();
        let source = source_repo
            .upload_stream("f", body(b"x"), UploadOptions::default())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = Repository::move_between(
            &source_repo,
            &target_repo,
            source.uri.clone(),
            "g",
            None,
            None,
            None,
            &cancel,
        )
        .await;
        assert!(matches!(outcome, Err(RepositoryError::Cancelled)));
        assert!(backend.exists("archive", "g").await.unwrap());
        assert!(backend.exists("data", "root/f").await.unwrap());

        let moved = Repository::move_between(
            &source_repo,
            &target_repo,
            source.uri,
            "h",
            None,
            None,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(moved.unwrap().as_str(), format!("{}/archive/h", ENDPOINT));
        assert!(!backend.exists("data", "root/f").await.unwrap());
    }

    #[tokio::test]
    async fn three_party_move_of_missing_source_is_a_no_op() {
        let (repo, backend) = repository().await;
        let ghost = repo.backend().endpoint().blob_uri("data", "ghost");
        let moved = Repository::move_between(&repo, &repo, ghost, "g", None, None, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(moved, None);
        assert_eq!(backend.copies(), 0);
        assert_eq!(backend.deletes(), 0);
    }

    async fn account(endpoint: &str, virtual_path: Option<&str>) -> (Repository, Arc<RecordingBackend>) {
        let inner = MemoryBackend::new(ServiceEndpoint::parse(endpoint).unwrap());
        let backend = Arc::new(RecordingBackend::wrapping(inner));
        let repo = Repository::open(
            backend.clone(),
            Arc::new(StorageAccountOptions::development()),
            RepositoryOptions {
                initial_container: Some("data".into()),
                virtual_path: virtual_path.map(str::to_string),
            },
        )
        .await
        .unwrap();
        (repo, backend)
    }

    #[tokio::test]
    async fn copy_and_move_across_accounts() {
        let (source_repo, source_backend) =
            account("https://accounta.blob.core.windows.net", None).await;
        let (target_repo, target_backend) =
            account("https://accountb.blob.core.windows.net", None).await;
        let source = source_repo
            .upload_stream(
                "f",
                body(b"payload"),
                UploadOptions {
                    metadata: Some(&bag(&[("origin", "a")])),
                    headers: Some(&HttpHeaders::with_content_type("text/plain")),
                    ..UploadOptions::default()
                },
            )
            .await
            .unwrap();
        let cancel = CancellationToken::new();

        let copied = Repository::copy_between(
            &source_repo,
            &target_repo,
            source.uri.clone(),
            "c",
            None,
            None,
            None,
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(copied.as_str(), "https://accountb.blob.core.windows.net/data/c");
        let props = target_backend.get_properties("data", "c").await.unwrap();
        assert_eq!(props.metadata, bag(&[("origin", "a")]));
        assert_eq!(props.http_headers.content_type.as_deref(), Some("text/plain"));
        assert!(source_backend.exists("data", "f").await.unwrap());

        let moved = Repository::move_between(
            &source_repo,
            &target_repo,
            source.uri,
            "g",
            Some("moved"),
            None,
            None,
            &cancel,
        )
        .await
        .unwrap();
        assert_eq!(
            moved.unwrap().as_str(),
            "https://accountb.blob.core.windows.net/data/moved/g"
        );
        let blob = target_repo.get("moved/g", false, NO_PROPS).await.unwrap().unwrap();
        assert_eq!(blob.content, Bytes::from_static(b"payload"));
        assert!(!source_backend.exists("data", "f").await.unwrap());
        assert_eq!(target_backend.copies(), 2);
        assert_eq!(source_backend.copies(), 0);
    }

    #[tokio::test]
    async fn copy_of_foreign_uri_needs_a_backend_that_reaches_it() {
        let (repo, backend) = account("https://accountb.blob.core.windows.net", None).await;
        let foreign = Url::parse("https://accounta.blob.core.windows.net/data/f?sig=abc").unwrap();
        assert!(matches!(
            repo.copy(CopySpec::new(foreign, "x"), &CancellationToken::new()).await,
            Err(RepositoryError::InvalidUri(_))
        ));
        assert_eq!(backend.copies(), 1);
        assert!(!backend.exists("data", "x").await.unwrap());
    }

    #[tokio::test]
    async fn move_onto_itself_keeps_the_blob() {
        let (repo, backend) = account(ENDPOINT, None).await;
        let uploaded = repo
            .upload_stream("f", body(b"x"), UploadOptions::default())
            .await
            .unwrap();
        let cancel = CancellationToken::new();

        let moved = repo.move_within("f", true, None, &cancel).await.unwrap();
        assert_eq!(moved.unwrap().as_str(), format!("{}/data/f", ENDPOINT));

        let same_container = ContainerMove {
            source_container: "data".into(),
            target_container: "data".into(),
            source_name: "f".into(),
            target_name: "f".into(),
            ..ContainerMove::default()
        };
        assert!(repo.move_between_containers(&same_container, &cancel).await.unwrap().is_some());

        let moved = Repository::move_between(&repo, &repo, uploaded.uri, "f", None, None, None, &cancel)
            .await
            .unwrap();
        assert!(moved.is_some());

        assert!(repo.exists("f").await.unwrap());
        assert_eq!(backend.copies(), 0);
        assert_eq!(backend.deletes(), 0);
    }

    #[tokio::test]
    async fn move_to_own_directory_keeps_the_blob() {
        let (repo, backend) = account(ENDPOINT, Some("dir")).await;
        repo.upload_stream("f", body(b"x"), UploadOptions::default()).await.unwrap();

        let moved = repo
            .move_to_directory("f", "dir/", true, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(moved.unwrap().as_str(), format!("{}/data/dir/f", ENDPOINT));
        assert!(repo.exists("dir/f").await.unwrap());
        assert_eq!(backend.deletes(), 0);
    }

    #[tokio::test]
    async fn blob_sas_requires_existing_blob() {
        let (repo, _) = repository().await;
        let config = sas_configuration("data");
        let missing = repo
            .create_blob_sas("nope", None, &config, SasPermissions::READ, SasResourceTypes::OBJECT, SasServices::BLOB)
            .await
            .unwrap();
        assert!(missing.is_none());

        repo.upload_stream("f", body(b"x"), UploadOptions::default()).await.unwrap();
        let before = Utc::now();
        let token = repo
            .create_blob_sas("f", Some("root"), &config, SasPermissions::READ, SasResourceTypes::OBJECT, SasServices::BLOB)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.uri.as_str(), format!("{}/data/root/f", ENDPOINT));
        assert!(token.query.starts_with('?'));
        assert!(token.starts_on <= before);
        assert!(token.expires_on >= before + ChronoDuration::minutes(60) - ChronoDuration::seconds(1));

        let credential = StorageAccountOptions::development().credential().unwrap();
        let location = BlobLocation {
            container: "data".into(),
            key: "root/f".into(),
        };
        assert_eq!(
            credential.verify(&token.query, &location, SasPermissions::READ, Utc::now()),
            Ok(())
        );
    }

    #[tokio::test]
    async fn container_sas_creates_container_and_validates_window() {
        let (repo, backend) = repository().await;
        let token = repo
            .create_container_sas(
                &sas_configuration("exports"),
                SasPermissions::READ | SasPermissions::LIST,
                SasResourceTypes::CONTAINER | SasResourceTypes::OBJECT,
                SasServices::BLOB,
            )
            .await
            .unwrap();
        assert_eq!(token.uri.as_str(), format!("{}/exports", ENDPOINT));
        assert!(token.query.contains("sr=c"));
        assert_eq!(backend.creates(), 2);

        let mut invalid = sas_configuration("");
        invalid.valid_from_in_minutes = 0;
        assert!(matches!(
            repo.create_account_sas(&invalid, SasPermissions::READ, SasResourceTypes::SERVICE, SasServices::BLOB),
            Err(RepositoryError::InvalidSasConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn sas_without_credentials_is_a_configuration_error() {
        let repo = Repository::open(
            Arc::new(RecordingBackend::new()),
            Arc::new(StorageAccountOptions::default()),
            RepositoryOptions {
                initial_container: Some("data".into()),
                virtual_path: None,
            },
        )
        .await
        .unwrap();
        assert!(matches!(
            repo.create_account_sas(&sas_configuration(""), SasPermissions::READ, SasResourceTypes::SERVICE, SasServices::BLOB),
            Err(RepositoryError::Configuration(_))
        ));
    }
}
