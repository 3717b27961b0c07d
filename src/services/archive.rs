//! Bulk ingestion of zip archives into a virtual directory.

use crate::models::headers::HttpHeaders;
use crate::services::{
    backend::ByteStream,
    error::{RepositoryError, RepositoryResult},
    repository::{Repository, UploadOptions},
};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use std::io::{Cursor, Read};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use zip::ZipArchive;

/// One file entry read out of the archive.
struct ArchiveFile {
    key: String,
    content_type: String,
    content: Bytes,
}

impl Repository {
    /// Upload every file of a zip archive below `root` in the active
    /// container.
    ///
    /// Keys are `{root}/{entry path}` and ignore the virtual root. Directory
    /// entries are skipped. Any failure, cancellation included, deletes the
    /// entries uploaded so far and yields `0`. Blobs that were under `root`
    /// before the call are left alone unless an entry overwrote them.
    pub async fn upload_zip_archive(
        &self,
        root: &str,
        archive: ByteStream<'_>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<usize> {
        // A missing container is an error, not a rollback.
        self.active_container()
            .ok_or(RepositoryError::NoActiveContainer)?;

        let mut uploaded = Vec::new();
        match self.ingest(root, archive, &mut uploaded, cancel).await {
            Ok(()) => {
                info!(root, count = uploaded.len(), "archive ingested");
                Ok(uploaded.len())
            }
            Err(err) => {
                error!(root, error = %err, uploaded = uploaded.len(), "archive ingestion failed, removing uploaded entries");
                // Rollback runs to completion even when the caller cancelled.
                for key in &uploaded {
                    if let Err(cleanup) = self.delete(key, false).await {
                        warn!(root, blob = %key, error = %cleanup, "archive rollback incomplete");
                    }
                }
                Ok(0)
            }
        }
    }

    async fn ingest(
        &self,
        root: &str,
        archive: ByteStream<'_>,
        uploaded: &mut Vec<String>,
        cancel: &CancellationToken,
    ) -> RepositoryResult<()> {
        let buffer: Vec<u8> = archive
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?;
        let mut zip = ZipArchive::new(Cursor::new(buffer))?;

        for index in 0..zip.len() {
            if cancel.is_cancelled() {
                return Err(RepositoryError::Cancelled);
            }
            let Some(ArchiveFile {
                key,
                content_type,
                content,
            }) = read_entry(&mut zip, index, root)?
            else {
                continue;
            };

            info!(key = %key, content_type = %content_type, "uploading archive entry");
            let headers = HttpHeaders::with_content_type(content_type);
            let body = stream::once(async move { Ok(content) }).boxed();
            self.upload_stream(
                &key,
                body,
                UploadOptions {
                    use_virtual_directory: false,
                    metadata: None,
                    headers: Some(&headers),
                },
            )
            .await?;
            uploaded.push(key);
        }
        if cancel.is_cancelled() {
            return Err(RepositoryError::Cancelled);
        }
        Ok(())
    }
}

fn read_entry(
    zip: &mut ZipArchive<Cursor<Vec<u8>>>,
    index: usize,
    root: &str,
) -> RepositoryResult<Option<ArchiveFile>> {
    let mut entry = zip.by_index(index)?;
    let path = entry.name().to_string();
    if path.ends_with('/') {
        return Ok(None);
    }

    let content_type = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    let mut content = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or_default());
    entry.read_to_end(&mut content)?;

    Ok(Some(ArchiveFile {
        key: format!("{}/{}", root, path.trim_start_matches('/')),
        content_type,
        content: Bytes::from(content),
    }))
}
