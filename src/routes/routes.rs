//! Defines routes for blob, container and repository operations.
//!
//! ## Structure
//! - **Container-level endpoints**
//!   - `GET    /{container}`: list blobs (supports prefix, content_type)
//!   - `DELETE /{container}`: delete the virtual directory given by `prefix`
//!
//! - **Blob-level endpoints**
//!   - `PUT    /{container}/{*key}`: upload blob
//!   - `GET    /{container}/{*key}`: download blob
//!   - `HEAD   /{container}/{*key}`: retrieve properties only
//!   - `DELETE /{container}/{*key}`: delete blob
//!
//! - **Repository endpoints**
//!   - `POST /_archive/{container}/{*root}`: zip ingestion
//!   - `POST /_copy`, `POST /_move`, `POST /_sas`
//!
//! The wildcard `*key` allows nested keys like `DEU/2020/11/02/districts.json`.

use crate::handlers::{
    health_handlers::{healthz, readyz},
    object_handlers::{
        AppState, copy_blob, create_sas, delete_blob, delete_directory, get_blob, head_blob,
        ingest_archive, list_blobs, move_blob, upload_blob,
    },
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build the router. State is attached by the caller with `with_state`.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Repository operations
        .route("/_archive/{container}/{*root}", post(ingest_archive))
        .route("/_copy", post(copy_blob))
        .route("/_move", post(move_blob))
        .route("/_sas", post(create_sas))
        // Blob-level routes
        .route(
            "/{container}/{*key}",
            put(upload_blob)
                .get(get_blob)
                .head(head_blob)
                .delete(delete_blob),
        )
        // Container-level routes
        .route("/{container}", get(list_blobs).delete(delete_directory))
}
