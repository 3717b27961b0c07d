//! Represents a blob (object) stored in a container.

use crate::models::headers::{HttpHeaders, PropertyBag, names};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use url::Url;
use uuid::Uuid;

/// State of the server-side copy that produced a blob, if any.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CopyStatus {
    Pending,
    Success,
    Failed(String),
}

impl CopyStatus {
    pub fn as_str(&self) -> &str {
        match self {
            CopyStatus::Pending => "pending",
            CopyStatus::Success => "success",
            CopyStatus::Failed(_) => "failed",
        }
    }
}

/// System properties, HTTP headers and metadata of a stored blob.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BlobProperties {
    pub content_length: i64,
    pub http_headers: HttpHeaders,
    pub etag: String,
    pub created_on: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub copy_id: Option<String>,
    pub copy_source: Option<String>,
    pub copy_status: Option<CopyStatus>,
    pub metadata: PropertyBag,
}

impl BlobProperties {
    /// Look up a single property by name.
    ///
    /// System properties and headers are addressed by their well-known names;
    /// any other name is looked up in the metadata. Returns `None` when the
    /// blob carries no value for the name.
    pub fn named(&self, name: &str) -> Option<String> {
        let headers = &self.http_headers;
        match name {
            names::CONTENT_TYPE => headers.content_type.clone(),
            names::CACHE_CONTROL => headers.cache_control.clone(),
            names::CONTENT_ENCODING => headers.content_encoding.clone(),
            names::CONTENT_DISPOSITION => headers.content_disposition.clone(),
            names::CONTENT_LANGUAGE => headers.content_language.clone(),
            names::CONTENT_HASH => headers
                .content_hash
                .as_ref()
                .map(|hash| general_purpose::STANDARD.encode(hash)),
            "ContentLength" => Some(self.content_length.to_string()),
            "ETag" => Some(self.etag.clone()),
            "CreatedOn" => Some(self.created_on.to_rfc3339()),
            "LastModified" => Some(self.last_modified.to_rfc3339()),
            "CopyId" => self.copy_id.clone(),
            "CopySource" => self.copy_source.clone(),
            "CopyStatus" => self.copy_status.as_ref().map(|s| s.as_str().to_string()),
            "BlobType" => Some("BlockBlob".to_string()),
            other => self.metadata.get(other).cloned(),
        }
    }

    /// Collect the requested properties that are present on the blob.
    pub fn select<S: AsRef<str>>(&self, requested: &[S]) -> PropertyBag {
        requested
            .iter()
            .filter_map(|name| {
                let name = name.as_ref();
                self.named(name).map(|value| (name.to_string(), value))
            })
            .collect()
    }
}

/// One entry of a container listing.
#[derive(Clone, Debug)]
pub struct BlobItem {
    pub name: String,
    pub deleted: bool,
    pub properties: BlobProperties,
}

/// Non-owning reference to one blob in one container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobHandle {
    pub container: String,
    pub key: String,
    pub uri: Url,
}

/// A downloaded blob with the named properties that were requested.
#[derive(Clone, Debug)]
pub struct DownloadedBlob {
    pub content: Bytes,
    pub properties: PropertyBag,
}

/// Blob metadata row as stored by the local backend.
#[derive(Clone, FromRow, Debug)]
pub struct BlobRecord {
    pub id: Uuid,
    pub container_id: Uuid,
    pub key: String,
    pub content_length: i64,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_encoding: Option<String>,
    pub content_disposition: Option<String>,
    pub content_language: Option<String>,
    pub content_md5: Option<Vec<u8>>,
    pub etag: String,
    /// JSON object of user metadata.
    pub metadata: String,
    pub copy_id: Option<String>,
    pub copy_source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub is_deleted: bool,
}

impl BlobRecord {
    pub fn http_headers(&self) -> HttpHeaders {
        HttpHeaders {
            content_type: self.content_type.clone(),
            cache_control: self.cache_control.clone(),
            content_encoding: self.content_encoding.clone(),
            content_disposition: self.content_disposition.clone(),
            content_hash: self.content_md5.clone(),
            content_language: self.content_language.clone(),
        }
    }

    /// Convert into properties, failing when the metadata column is corrupt.
    pub fn properties(&self) -> Result<BlobProperties, serde_json::Error> {
        let metadata: PropertyBag = serde_json::from_str(&self.metadata)?;
        Ok(BlobProperties {
            content_length: self.content_length,
            http_headers: self.http_headers(),
            etag: self.etag.clone(),
            created_on: self.created_at,
            last_modified: self.last_modified,
            copy_id: self.copy_id.clone(),
            copy_source: self.copy_source.clone(),
            copy_status: self.copy_id.as_ref().map(|_| CopyStatus::Success),
            metadata,
        })
    }
}
