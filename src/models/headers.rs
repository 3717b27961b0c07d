//! HTTP header set and free-form property bag attached to stored blobs.

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Arbitrary string metadata attached to a blob (`x-ms-meta-*` on the wire).
pub type PropertyBag = BTreeMap<String, String>;

/// Header names used as keys in header maps and named property lookups.
pub mod names {
    pub const CONTENT_TYPE: &str = "ContentType";
    pub const CACHE_CONTROL: &str = "CacheControl";
    pub const CONTENT_ENCODING: &str = "ContentEncoding";
    pub const CONTENT_DISPOSITION: &str = "ContentDisposition";
    pub const CONTENT_HASH: &str = "ContentHash";
    pub const CONTENT_LANGUAGE: &str = "ContentLanguage";
}

/// A header value as carried in header maps.
///
/// Every header is textual except the content hash, which callers may hand
/// over as raw bytes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum HeaderValue {
    Text(String),
    Binary(Vec<u8>),
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Text(value)
    }
}

impl From<Vec<u8>> for HeaderValue {
    fn from(value: Vec<u8>) -> Self {
        HeaderValue::Binary(value)
    }
}

/// Header map keyed by the names in [`names`].
pub type HeaderMap = BTreeMap<String, HeaderValue>;

/// Standard HTTP headers stored alongside a blob.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpHeaders {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_encoding: Option<String>,
    pub content_disposition: Option<String>,
    /// MD5 of the payload.
    pub content_hash: Option<Vec<u8>>,
    pub content_language: Option<String>,
}

impl HttpHeaders {
    pub fn with_content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..Self::default()
        }
    }

    /// Build a header set from a header map.
    ///
    /// Unknown names are ignored. Textual headers given as bytes are ignored,
    /// a textual content hash is read as base64.
    pub fn from_map(map: &HeaderMap) -> Self {
        let text = |name: &str| match map.get(name) {
            Some(HeaderValue::Text(value)) => Some(value.clone()),
            _ => None,
        };

        let content_hash = match map.get(names::CONTENT_HASH) {
            Some(HeaderValue::Binary(bytes)) => Some(bytes.clone()),
            Some(HeaderValue::Text(encoded)) => general_purpose::STANDARD.decode(encoded).ok(),
            None => None,
        };

        Self {
            content_type: text(names::CONTENT_TYPE),
            cache_control: text(names::CACHE_CONTROL),
            content_encoding: text(names::CONTENT_ENCODING),
            content_disposition: text(names::CONTENT_DISPOSITION),
            content_hash,
            content_language: text(names::CONTENT_LANGUAGE),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
