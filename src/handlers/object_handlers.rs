//! HTTP handlers for blob and container operations.
//! Streams upload bodies into the repository and maps repository errors to
//! JSON error responses.
//!
//! Blob routes address full keys; only `_move` with `to_virtual_directory`
//! uses the configured virtual root.

use crate::{
    errors::AppError,
    models::{
        blob::BlobProperties,
        headers::{HttpHeaders, PropertyBag},
        requests::{HttpHeadersRequest, PropertiesRequest},
        sas::{SasConfiguration, SasPermissions, SasResourceTypes, SasServices, SasToken},
    },
    services::repository::{ContainerMove, Repository, UploadOptions},
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::sync::CancellationToken;
use url::Url;

const META_PREFIX: &str = "x-ms-meta-";
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub repository: Repository,
    /// Cancelled on shutdown; long-running operations watch a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(repository: Repository) -> Self {
        Self {
            repository,
            shutdown: CancellationToken::new(),
        }
    }

    async fn container(&self, name: &str) -> Result<Repository, AppError> {
        Ok(self.repository.with_container(name).await?)
    }
}

#[derive(Debug, Serialize)]
pub struct BlobResponse {
    pub container: String,
    pub key: String,
    pub uri: Url,
}

/// Query params accepted by container listing and directory deletes.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub prefix: Option<String>,
    pub content_type: Option<String>,
}

fn header_text(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn request_headers(headers: &HeaderMap) -> Result<HttpHeaders, AppError> {
    let content_hash = header_text(headers, HeaderName::from_static("content-md5"))
        .map(|encoded| {
            general_purpose::STANDARD
                .decode(encoded)
                .map_err(|err| AppError::bad_request(format!("invalid Content-MD5: {}", err)))
        })
        .transpose()?;

    Ok(HttpHeaders {
        content_type: header_text(headers, header::CONTENT_TYPE),
        cache_control: header_text(headers, header::CACHE_CONTROL),
        content_encoding: header_text(headers, header::CONTENT_ENCODING),
        content_disposition: header_text(headers, header::CONTENT_DISPOSITION),
        content_hash,
        content_language: header_text(headers, header::CONTENT_LANGUAGE),
    })
}

fn request_metadata(headers: &HeaderMap) -> PropertyBag {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(META_PREFIX)?;
            Some((key.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect()
}

fn body_stream(body: Body) -> crate::services::backend::ByteStream<'static> {
    body.into_data_stream().map_err(io::Error::other).boxed()
}

/// Upload a blob to `/{container}/{*key}`.
///
/// Standard content headers are stored with the blob, `x-ms-meta-*` headers
/// become metadata.
pub async fn upload_blob(
    State(state): State<AppState>,
    Path((container, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let repository = state.container(&container).await?;
    let http_headers = request_headers(&headers)?;
    let metadata = request_metadata(&headers);

    let handle = repository
        .upload_stream(
            &key,
            body_stream(body),
            UploadOptions {
                use_virtual_directory: false,
                metadata: Some(&metadata),
                headers: Some(&http_headers),
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(BlobResponse {
            container: handle.container,
            key: handle.key,
            uri: handle.uri,
        }),
    ))
}

/// Download a blob `/{container}/{*key}`.
pub async fn get_blob(
    State(state): State<AppState>,
    Path((container, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let repository = state.container(&container).await?;
    let blob = repository
        .get(&key, false, &[] as &[&str])
        .await?
        .ok_or_else(|| AppError::not_found(format!("blob `{}` not found", key)))?;
    let properties = repository.properties(&key, false).await?;

    let mut response = Response::new(Body::from(blob.content));
    if let Some(properties) = properties.as_ref() {
        set_blob_headers(response.headers_mut(), properties);
    }
    Ok(response)
}

/// HEAD `/{container}/{*key}`: same headers as GET but no body.
pub async fn head_blob(
    State(state): State<AppState>,
    Path((container, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let repository = state.container(&container).await?;
    let properties = repository
        .properties(&key, false)
        .await?
        .ok_or_else(|| AppError::not_found(format!("blob `{}` not found", key)))?;

    let mut response = Response::new(Body::empty());
    set_blob_headers(response.headers_mut(), &properties);
    Ok(response)
}

/// DELETE `/{container}/{*key}`
pub async fn delete_blob(
    State(state): State<AppState>,
    Path((container, key)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let repository = state.container(&container).await?;
    if repository.delete(&key, false).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("blob `{}` not found", key)))
    }
}

/// `GET /{container}?prefix=&content_type=`: live blobs under a prefix.
pub async fn list_blobs(
    State(state): State<AppState>,
    Path(container): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<BlobResponse>>, AppError> {
    let repository = state.container(&container).await?;
    let prefix = query.prefix.unwrap_or_default();
    let wanted = query.content_type;
    let handles = repository
        .list_where(
            &prefix,
            |props: &BlobProperties| match wanted.as_deref() {
                Some(content_type) => props.http_headers.content_type.as_deref() == Some(content_type),
                None => true,
            },
            &state.shutdown.child_token(),
        )
        .await?;

    Ok(Json(
        handles
            .into_iter()
            .map(|handle| BlobResponse {
                container: handle.container,
                key: handle.key,
                uri: handle.uri,
            })
            .collect(),
    ))
}

/// `DELETE /{container}?prefix=`: delete a virtual directory.
pub async fn delete_directory(
    State(state): State<AppState>,
    Path(container): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let prefix = query
        .prefix
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::bad_request("a non-empty `prefix` is required"))?;
    let repository = state.container(&container).await?;
    let deleted = repository
        .delete_directory(&prefix, false, &state.shutdown.child_token())
        .await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

/// `POST /_archive/{container}/{*root}`: unpack a zip body below `root`.
pub async fn ingest_archive(
    State(state): State<AppState>,
    Path((container, root)): Path<(String, String)>,
    body: Body,
) -> Result<Json<serde_json::Value>, AppError> {
    let repository = state.container(&container).await?;
    let root = root.trim_end_matches('/');
    let count = repository
        .upload_zip_archive(root, body_stream(body), &state.shutdown.child_token())
        .await?;
    Ok(Json(serde_json::json!({ "uploaded": count })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyRequest {
    pub source: Url,
    pub container: String,
    pub target_name: String,
    pub target_virtual_path: Option<String>,
    pub properties: Option<PropertiesRequest>,
    pub headers: Option<HttpHeadersRequest>,
}

/// `POST /_copy`
pub async fn copy_blob(
    State(state): State<AppState>,
    Json(request): Json<CopyRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let repository = state.container(&request.container).await?;
    let uri = repository
        .copy_with_requests(
            request.source,
            &request.target_name,
            request.target_virtual_path.as_deref(),
            request.properties.as_ref(),
            request.headers.as_ref(),
            &state.shutdown.child_token(),
        )
        .await?;
    Ok(Json(serde_json::json!({ "uri": uri })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum MoveRequest {
    /// Toggle a blob in or out of the virtual root of `container`.
    #[serde(rename_all = "camelCase")]
    VirtualRoot {
        container: String,
        name: String,
        to_virtual_directory: bool,
        properties: Option<Vec<String>>,
    },
    /// Move `name` below `directory` in `container`.
    Directory {
        container: String,
        name: String,
        directory: String,
        properties: Option<Vec<String>>,
    },
    #[serde(rename_all = "camelCase")]
    Container {
        source_container: String,
        target_container: String,
        source_name: String,
        target_name: String,
        source_virtual_path: Option<String>,
        target_virtual_path: Option<String>,
        properties: Option<Vec<String>>,
    },
}

/// `POST /_move`: 404 when the source does not exist.
pub async fn move_blob(
    State(state): State<AppState>,
    Json(request): Json<MoveRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let cancel = state.shutdown.child_token();
    let moved = match request {
        MoveRequest::VirtualRoot {
            container,
            name,
            to_virtual_directory,
            properties,
        } => {
            state
                .container(&container)
                .await?
                .move_within(&name, to_virtual_directory, properties.as_deref(), &cancel)
                .await?
        }
        MoveRequest::Directory {
            container,
            name,
            directory,
            properties,
        } => {
            state
                .container(&container)
                .await?
                .move_to_directory(&name, &directory, false, properties.as_deref(), &cancel)
                .await?
        }
        MoveRequest::Container {
            source_container,
            target_container,
            source_name,
            target_name,
            source_virtual_path,
            target_virtual_path,
            properties,
        } => {
            let request = ContainerMove {
                source_container,
                target_container,
                source_name,
                target_name,
                source_virtual_path,
                target_virtual_path,
                properties,
            };
            state
                .repository
                .move_between_containers(&request, &cancel)
                .await?
        }
    };

    let uri = moved.ok_or_else(|| AppError::not_found("move source does not exist"))?;
    Ok(Json(serde_json::json!({ "uri": uri })))
}

#[derive(Debug, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SasScopeKind {
    Account,
    #[default]
    Container,
    Blob,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SasRequest {
    #[serde(default)]
    pub scope: SasScopeKind,
    pub configuration: SasConfiguration,
    /// Signed letters, e.g. `rl`.
    pub permissions: String,
    #[serde(default = "default_resource_types")]
    pub resource_types: String,
    #[serde(default = "default_services")]
    pub services: String,
    /// Blob name, required for blob scope.
    pub name: Option<String>,
    pub virtual_path: Option<String>,
}

fn default_resource_types() -> String {
    "sco".into()
}

fn default_services() -> String {
    "b".into()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SasResponse {
    pub uri: Url,
    pub sas_token: String,
    pub signed_uri: String,
    pub expires_on: chrono::DateTime<chrono::Utc>,
}

impl From<SasToken> for SasResponse {
    fn from(token: SasToken) -> Self {
        Self {
            signed_uri: token.signed_uri(),
            uri: token.uri,
            sas_token: token.query,
            expires_on: token.expires_on,
        }
    }
}

/// `POST /_sas`: issue an account, container or blob token.
pub async fn create_sas(
    State(state): State<AppState>,
    Json(request): Json<SasRequest>,
) -> Result<Json<SasResponse>, AppError> {
    let bad_flags = |err: crate::models::sas::SasFlagError| AppError::bad_request(err.to_string());
    let permissions = SasPermissions::parse(&request.permissions).map_err(bad_flags)?;
    let resource_types = SasResourceTypes::parse(&request.resource_types).map_err(bad_flags)?;
    let services = SasServices::parse(&request.services).map_err(bad_flags)?;
    let repository = &state.repository;

    let token = match request.scope {
        SasScopeKind::Account => repository.create_account_sas(
            &request.configuration,
            permissions,
            resource_types,
            services,
        )?,
        SasScopeKind::Container => {
            repository
                .create_container_sas(&request.configuration, permissions, resource_types, services)
                .await?
        }
        SasScopeKind::Blob => {
            let name = request
                .name
                .as_deref()
                .ok_or_else(|| AppError::bad_request("blob scope requires `name`"))?;
            repository
                .create_blob_sas(
                    name,
                    request.virtual_path.as_deref(),
                    &request.configuration,
                    permissions,
                    resource_types,
                    services,
                )
                .await?
                .ok_or_else(|| AppError::not_found(format!("blob `{}` not found", name)))?
        }
    };
    Ok(Json(token.into()))
}

fn set_blob_headers(headers: &mut HeaderMap, props: &BlobProperties) {
    let http = &props.http_headers;
    let mut put = |name: HeaderName, value: Option<String>| {
        if let Some(value) = value.and_then(|v| HeaderValue::from_str(&v).ok()) {
            headers.insert(name, value);
        }
    };

    put(header::CONTENT_TYPE, http.content_type.clone());
    put(header::CACHE_CONTROL, http.cache_control.clone());
    put(header::CONTENT_ENCODING, http.content_encoding.clone());
    put(header::CONTENT_DISPOSITION, http.content_disposition.clone());
    put(header::CONTENT_LANGUAGE, http.content_language.clone());
    put(
        HeaderName::from_static("content-md5"),
        http.content_hash
            .as_ref()
            .map(|hash| general_purpose::STANDARD.encode(hash)),
    );
    put(header::ETAG, Some(format!("\"{}\"", props.etag)));
    put(
        header::LAST_MODIFIED,
        Some(props.last_modified.format(HTTP_DATE).to_string()),
    );
    put(header::CONTENT_LENGTH, Some(props.content_length.to_string()));

    for (key, value) in &props.metadata {
        let name = HeaderName::from_bytes(format!("{}{}", META_PREFIX, key).as_bytes());
        if let (Ok(name), Ok(value)) = (name, HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
}
