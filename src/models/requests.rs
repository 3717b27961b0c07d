//! Property and header requests used when copying or moving blobs.

use crate::models::headers::{HeaderMap, PropertyBag};
use serde::{Deserialize, Serialize};

/// Metadata to carry over from a copy source.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PropertiesRequest {
    /// Property names to take from the source blob.
    #[serde(default)]
    pub take_from_source: Vec<String>,

    /// Values to apply. These overwrite values taken from the source.
    #[serde(default)]
    pub values_to_add: PropertyBag,
}

/// HTTP headers to carry over from a copy source.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct HttpHeadersRequest {
    /// Header names to take from the source blob.
    #[serde(default)]
    pub take_from_source: Vec<String>,

    /// Values to apply. These overwrite values taken from the source.
    #[serde(default)]
    pub values_to_add: HeaderMap,
}
