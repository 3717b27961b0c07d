//! Represents a container, a named top-level namespace for blobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use url::Url;
use uuid::Uuid;

/// A cached reference to a container that is known to exist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerHandle {
    pub name: String,
    pub uri: Url,
}

/// Container row as stored by the local backend.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ContainerRecord {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Container name, unique per account.
    pub name: String,

    /// When this container was created.
    pub created_at: DateTime<Utc>,
}
