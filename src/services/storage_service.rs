//! src/services/storage_service.rs
//!
//! EntryStorageService stores one JSON document per entity type per day,
//! partitioned by country code and date, on top of a [`Repository`].
//!
//! Writes go to `{cc}/{yyyy}/{MM}/{dd}/{target}.json` while reads fetch the
//! undated `{target}.json`. Whatever publishes the latest snapshot under the
//! undated name is outside this service.

use crate::models::headers::HttpHeaders;
use crate::services::{
    error::RepositoryResult,
    repository::{Repository, UploadOptions},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use serde::{Serialize, de::DeserializeOwned};
use std::marker::PhantomData;
use tracing::{error, info};

const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Clone, Debug)]
pub struct EntryStorageOptions {
    /// Container every entry is written to and read from.
    pub container: String,
    pub cache_control_in_seconds: u32,
    /// File stem of the stored document, e.g. `districts`.
    pub target_file_name: String,
}

/// Typed JSON snapshots of `T`.
#[derive(Clone)]
pub struct EntryStorageService<T> {
    repository: Repository,
    options: EntryStorageOptions,
    _entry: PhantomData<fn() -> T>,
}

impl<T> EntryStorageService<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(repository: Repository, options: EntryStorageOptions) -> Self {
        Self {
            repository,
            options,
            _entry: PhantomData,
        }
    }

    /// Key of the dated document for `country_code` on `at`.
    pub fn entry_key(&self, country_code: &str, at: DateTime<Utc>) -> String {
        format!(
            "{}/{}/{}.json",
            country_code,
            at.format("%Y/%m/%d"),
            self.options.target_file_name
        )
    }

    /// Serialize `entry` and store it under today's (or `at`'s) key.
    pub async fn add_entry(
        &self,
        country_code: &str,
        entry: &T,
        at: Option<DateTime<Utc>>,
    ) -> RepositoryResult<()> {
        let payload = Bytes::from(serde_json::to_vec(entry)?);
        let key = self.entry_key(country_code, at.unwrap_or_else(Utc::now));
        info!(blob = %key, "uploading json entry");

        let repository = self.repository.with_container(&self.options.container).await?;
        let headers = HttpHeaders {
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            cache_control: Some(format!("max-age={}", self.options.cache_control_in_seconds)),
            ..HttpHeaders::default()
        };
        let body = stream::once(async move { Ok(payload) }).boxed();

        match repository
            .upload_stream(
                &key,
                body,
                UploadOptions {
                    use_virtual_directory: false,
                    metadata: None,
                    headers: Some(&headers),
                },
            )
            .await
        {
            Ok(handle) => {
                info!(uri = %handle.uri, "json entry uploaded");
                Ok(())
            }
            Err(err) => {
                error!(blob = %key, error = %err, "uploading json entry failed");
                Err(err)
            }
        }
    }

    /// Read the undated `{target}.json`, `None` when it does not exist.
    pub async fn get_entry(&self) -> RepositoryResult<Option<T>> {
        let key = format!("{}.json", self.options.target_file_name);
        let repository = self.repository.with_container(&self.options.container).await?;

        let Some(blob) = repository.get(&key, false, &[] as &[&str]).await? else {
            info!(blob = %key, "json entry not found");
            return Ok(None);
        };
        let entry = serde_json::from_slice(&blob.content).inspect_err(|err| {
            error!(blob = %key, error = %err, "json entry is not readable");
        })?;
        Ok(Some(entry))
    }
}
