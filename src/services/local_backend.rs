//! LocalBackend: blob metadata in SQLite, payloads on local disk.
//!
//! Payloads live under `base_path/{container}/{shard}/{shard}/{md5(key)}`.
//! Hashing the key into the file name keeps arbitrary keys (including `..`
//! and leading `/`) inside the container root.

use crate::models::{
    blob::{BlobItem, BlobProperties, BlobRecord},
    container::ContainerRecord,
    headers::{HttpHeaders, PropertyBag},
    sas::SasPermissions,
};
use crate::services::{
    address::{BlobLocation, ServiceEndpoint},
    backend::{
        BackendError, BackendResult, ByteStream, CopyOperation, ReadinessCheck, StorageBackend,
    },
    sas::SharedKeyCredential,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::{
    StreamExt, TryStreamExt,
    stream::{self, BoxStream},
};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use url::{Url, form_urlencoded};
use uuid::Uuid;

const MAX_BLOB_KEY_LEN: usize = 1024;
const CONTAINER_NAME_MIN_LEN: usize = 3;
const CONTAINER_NAME_MAX_LEN: usize = 63;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const BLOB_COLUMNS: &str = "id, container_id, key, content_length, content_type, cache_control, \
     content_encoding, content_disposition, content_language, content_md5, etag, metadata, \
     copy_id, copy_source, created_at, last_modified, is_deleted";

/// Create the metadata tables if they do not exist yet.
pub async fn migrate(db: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(db).await?;
    Ok(())
}

/// Values written to a blob row on upload or copy.
struct BlobRow<'a> {
    content_length: i64,
    headers: &'a HttpHeaders,
    etag: String,
    metadata: &'a PropertyBag,
    copy_id: Option<String>,
    copy_source: Option<String>,
}

#[derive(Clone)]
pub struct LocalBackend {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where payloads are stored.
    pub base_path: PathBuf,

    endpoint: ServiceEndpoint,

    /// Verifies signed copy sources. Signed sources are refused without it.
    credential: Option<SharedKeyCredential>,
}

impl LocalBackend {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>, endpoint: ServiceEndpoint) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            endpoint,
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: SharedKeyCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Keys must be non-empty, at most 1024 bytes and free of control characters.
    fn ensure_key_safe(key: &str) -> BackendResult<()> {
        if key.is_empty() || key.len() > MAX_BLOB_KEY_LEN || key.chars().any(char::is_control) {
            return Err(BackendError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    /// Container names: 3-63 lowercase letters, digits and hyphens, starting
    /// and ending with a letter or digit, no consecutive hyphens.
    fn ensure_container_name_safe(name: &str) -> BackendResult<()> {
        let invalid = |reason: &str| BackendError::InvalidContainerName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if name.len() < CONTAINER_NAME_MIN_LEN || name.len() > CONTAINER_NAME_MAX_LEN {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, and hyphens",
            ));
        }
        if name.starts_with('-') || name.ends_with('-') {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }
        if name.contains("--") {
            return Err(invalid("cannot contain consecutive hyphens"));
        }
        Ok(())
    }

    fn container_root(&self, container: &str) -> PathBuf {
        self.base_path.join(container)
    }

    fn blob_path(&self, container: &str, key: &str) -> PathBuf {
        let digest = md5::compute(format!("{}/{}", container, key));
        let mut path = self.container_root(container);
        path.push(format!("{:02x}", digest[0]));
        path.push(format!("{:02x}", digest[1]));
        path.push(format!("{:x}", digest));
        path
    }

    async fn fetch_container(&self, name: &str) -> BackendResult<ContainerRecord> {
        Self::ensure_container_name_safe(name)?;
        sqlx::query_as::<_, ContainerRecord>(
            "SELECT id, name, created_at FROM containers WHERE name = ?",
        )
        .bind(name)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => BackendError::ContainerNotFound(name.to_string()),
            other => BackendError::Sqlx(other),
        })
    }

    async fn fetch_blob(&self, container: &ContainerRecord, key: &str) -> BackendResult<BlobRecord> {
        sqlx::query_as::<_, BlobRecord>(&format!(
            "SELECT {} FROM blobs WHERE container_id = ? AND key = ? AND is_deleted = 0",
            BLOB_COLUMNS
        ))
        .bind(container.id)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => BackendError::BlobNotFound {
                container: container.name.clone(),
                key: key.to_string(),
            },
            other => BackendError::Sqlx(other),
        })
    }

    /// Stream a payload into `file_path` via a temp file, fsync and rename.
    ///
    /// Returns size and MD5 of what was written. The temp file is removed on
    /// any failure.
    async fn write_payload<S>(&self, file_path: &Path, stream: S) -> BackendResult<(i64, md5::Digest)>
    where
        S: futures::Stream<Item = io::Result<bytes::Bytes>> + Send,
    {
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("blob path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            let mut size: i64 = 0;
            let mut digest = Context::new();
            let mut stream = std::pin::pin!(stream);
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                size += chunk.len() as i64;
                digest.consume(&chunk);
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, io::Error>((size, digest.compute()))
        }
        .await;

        let (size, digest) = match written {
            Ok(done) => done,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(BackendError::Io(err));
            }
        };

        if let Err(err) = fs::rename(&tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(&tmp_path, file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(BackendError::Io(err));
            }
        }
        Ok((size, digest))
    }

    /// Insert or overwrite a blob row, reviving soft-deleted rows.
    async fn upsert_blob(
        &self,
        container: &ContainerRecord,
        key: &str,
        row: BlobRow<'_>,
    ) -> BackendResult<()> {
        let metadata = serde_json::to_string(row.metadata).map_err(|source| {
            BackendError::CorruptMetadata {
                key: key.to_string(),
                source,
            }
        })?;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO blobs (
                id, container_id, key, content_length, content_type, cache_control,
                content_encoding, content_disposition, content_language, content_md5,
                etag, metadata, copy_id, copy_source, created_at, last_modified, is_deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(container_id, key) DO UPDATE SET
                content_length = excluded.content_length,
                content_type = excluded.content_type,
                cache_control = excluded.cache_control,
                content_encoding = excluded.content_encoding,
                content_disposition = excluded.content_disposition,
                content_language = excluded.content_language,
                content_md5 = excluded.content_md5,
                etag = excluded.etag,
                metadata = excluded.metadata,
                copy_id = excluded.copy_id,
                copy_source = excluded.copy_source,
                created_at = excluded.created_at,
                last_modified = excluded.last_modified,
                is_deleted = 0
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(container.id)
        .bind(key)
        .bind(row.content_length)
        .bind(row.headers.content_type.as_deref())
        .bind(row.headers.cache_control.as_deref())
        .bind(row.headers.content_encoding.as_deref())
        .bind(row.headers.content_disposition.as_deref())
        .bind(row.headers.content_language.as_deref())
        .bind(row.headers.content_hash.as_deref())
        .bind(&row.etag)
        .bind(metadata)
        .bind(row.copy_id)
        .bind(row.copy_source)
        .bind(now)
        .bind(now)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Refuse signed copy sources whose signature does not grant read access.
    fn authorize_source(&self, source: &Url, location: &BlobLocation) -> BackendResult<()> {
        let Some(query) = source.query() else {
            return Ok(());
        };
        let signed = form_urlencoded::parse(query.as_bytes()).any(|(name, _)| name == "sig");
        if !signed {
            return Ok(());
        }
        let credential = self.credential.as_ref().ok_or_else(|| {
            BackendError::Unauthorized("no credential configured to verify signature".into())
        })?;
        credential
            .verify(query, location, SasPermissions::READ, Utc::now())
            .map_err(|err| BackendError::Unauthorized(err.to_string()))
    }

    /// Recursively remove empty directories up to the container root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err)
                    if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::DirectoryNotEmpty) =>
                {
                    break;
                }
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    async fn check_sqlite(&self) -> Option<String> {
        match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await
        {
            Ok(1) => None,
            Ok(v) => Some(format!("unexpected result: {}", v)),
            Err(e) => Some(format!("error: {}", e)),
        }
    }

    async fn check_disk(&self) -> Option<String> {
        let probe = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        if let Err(e) = fs::write(&probe, b"readyz").await {
            return Some(format!("could not write tmp file: {}", e));
        }
        let outcome = match fs::read(&probe).await {
            Ok(bytes) if bytes == b"readyz" => None,
            Ok(_) => Some("file content mismatch".to_string()),
            Err(e) => Some(format!("could not read tmp file: {}", e)),
        };
        if let Err(e) = fs::remove_file(&probe).await {
            warn!("could not remove readiness probe {}: {}", probe.display(), e);
        }
        outcome
    }
}

fn record_to_item(record: BlobRecord) -> BackendResult<BlobItem> {
    let properties = record
        .properties()
        .map_err(|source| BackendError::CorruptMetadata {
            key: record.key.clone(),
            source,
        })?;
    Ok(BlobItem {
        name: record.key,
        deleted: record.is_deleted,
        properties,
    })
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    async fn create_container_if_missing(&self, name: &str) -> BackendResult<bool> {
        Self::ensure_container_name_safe(name)?;
        fs::create_dir_all(self.container_root(name)).await?;

        let result = sqlx::query(
            "INSERT INTO containers (id, name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn upload(
        &self,
        container: &str,
        key: &str,
        body: ByteStream<'_>,
        headers: Option<&HttpHeaders>,
        metadata: Option<&PropertyBag>,
    ) -> BackendResult<()> {
        Self::ensure_key_safe(key)?;
        let container_rec = self.fetch_container(container).await?;

        let file_path = self.blob_path(container, key);
        let (content_length, digest) = self.write_payload(&file_path, body).await?;

        let mut headers = headers.cloned().unwrap_or_default();
        if headers.content_hash.is_none() {
            headers.content_hash = Some(digest.0.to_vec());
        }
        let empty = PropertyBag::new();
        let row = BlobRow {
            content_length,
            headers: &headers,
            etag: format!("{:x}", digest),
            metadata: metadata.unwrap_or(&empty),
            copy_id: None,
            copy_source: None,
        };

        if let Err(err) = self.upsert_blob(&container_rec, key, row).await {
            let _ = fs::remove_file(&file_path).await;
            return Err(err);
        }
        debug!(container, key, size = content_length, "stored blob");
        Ok(())
    }

    async fn download(&self, container: &str, key: &str) -> BackendResult<ByteStream<'static>> {
        Self::ensure_key_safe(key)?;
        let container_rec = self.fetch_container(container).await?;
        self.fetch_blob(&container_rec, key).await?;

        let file = File::open(self.blob_path(container, key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    BackendError::BlobNotFound {
                        container: container.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    BackendError::Io(err)
                }
            })?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn delete_if_exists(&self, container: &str, key: &str) -> BackendResult<bool> {
        Self::ensure_key_safe(key)?;
        let container_rec = match self.fetch_container(container).await {
            Ok(rec) => rec,
            Err(BackendError::ContainerNotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        };

        let result = sqlx::query(
            "UPDATE blobs SET is_deleted = 1 WHERE container_id = ? AND key = ? AND is_deleted = 0",
        )
        .bind(container_rec.id)
        .bind(key)
        .execute(&*self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        let file_path = self.blob_path(container, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => warn!("failed to remove {}: {}", file_path.display(), err),
        }
        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.container_root(container))
                .await;
        }
        Ok(true)
    }

    async fn exists(&self, container: &str, key: &str) -> BackendResult<bool> {
        Self::ensure_key_safe(key)?;
        let container_rec = match self.fetch_container(container).await {
            Ok(rec) => rec,
            Err(BackendError::ContainerNotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        };
        match self.fetch_blob(&container_rec, key).await {
            Ok(_) => Ok(true),
            Err(BackendError::BlobNotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn get_properties(&self, container: &str, key: &str) -> BackendResult<BlobProperties> {
        Self::ensure_key_safe(key)?;
        let container_rec = self.fetch_container(container).await?;
        let record = self.fetch_blob(&container_rec, key).await?;
        Ok(record_to_item(record)?.properties)
    }

    async fn set_http_headers(
        &self,
        container: &str,
        key: &str,
        headers: &HttpHeaders,
    ) -> BackendResult<()> {
        Self::ensure_key_safe(key)?;
        let container_rec = self.fetch_container(container).await?;
        let result = sqlx::query(
            "UPDATE blobs SET content_type = ?, cache_control = ?, content_encoding = ?,
                 content_disposition = ?, content_language = ?, content_md5 = ?,
                 last_modified = ?
             WHERE container_id = ? AND key = ? AND is_deleted = 0",
        )
        .bind(headers.content_type.as_deref())
        .bind(headers.cache_control.as_deref())
        .bind(headers.content_encoding.as_deref())
        .bind(headers.content_disposition.as_deref())
        .bind(headers.content_language.as_deref())
        .bind(headers.content_hash.as_deref())
        .bind(Utc::now())
        .bind(container_rec.id)
        .bind(key)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BackendError::BlobNotFound {
                container: container.to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn start_copy_from_uri(
        &self,
        source: &Url,
        container: &str,
        key: &str,
        metadata: Option<&PropertyBag>,
    ) -> BackendResult<CopyOperation> {
        Self::ensure_key_safe(key)?;
        let location = self
            .endpoint
            .locate(source)
            .ok_or_else(|| BackendError::UnsupportedSource(source.to_string()))?;
        self.authorize_source(source, &location)?;

        let source_container = self.fetch_container(&location.container).await?;
        let source_record = self.fetch_blob(&source_container, &location.key).await?;
        let source_properties = record_to_item(source_record)?.properties;
        let target_container = self.fetch_container(container).await?;

        let source_file = File::open(self.blob_path(&location.container, &location.key)).await?;
        let target_path = self.blob_path(container, key);
        let (content_length, digest) = self
            .write_payload(&target_path, ReaderStream::new(source_file))
            .await?;

        let mut copy_source = source.clone();
        copy_source.set_query(None);
        let copy_id = Uuid::new_v4().to_string();
        let row = BlobRow {
            content_length,
            headers: &source_properties.http_headers,
            etag: format!("{:x}", digest),
            metadata: metadata.unwrap_or(&source_properties.metadata),
            copy_id: Some(copy_id.clone()),
            copy_source: Some(copy_source.to_string()),
        };
        if let Err(err) = self.upsert_blob(&target_container, key, row).await {
            let _ = fs::remove_file(&target_path).await;
            return Err(err);
        }

        debug!(copy_id = %copy_id, source = %copy_source, container, key, "copied blob");
        Ok(CopyOperation::completed(copy_id))
    }

    fn list<'a>(
        &'a self,
        container: &'a str,
        prefix: &'a str,
    ) -> BoxStream<'a, BackendResult<BlobItem>> {
        let rows = async move {
            let container_rec = self.fetch_container(container).await?;
            let query = format!(
                "SELECT {} FROM blobs
                 WHERE container_id = ? AND substr(key, 1, length(?)) = ?
                 ORDER BY key ASC",
                BLOB_COLUMNS
            );
            let records: Vec<BlobRecord> = sqlx::query_as::<_, BlobRecord>(&query)
                .bind(container_rec.id)
                .bind(prefix)
                .bind(prefix)
                .fetch_all(&*self.db)
                .await?;
            Ok::<_, BackendError>(stream::iter(records.into_iter().map(record_to_item)))
        };
        stream::once(rows).try_flatten().boxed()
    }

    async fn readiness(&self) -> Vec<ReadinessCheck> {
        vec![
            ReadinessCheck {
                name: "sqlite",
                error: self.check_sqlite().await,
            },
            ReadinessCheck {
                name: "disk",
                error: self.check_disk().await,
            },
        ]
    }
}
