//! Virtual-directory key resolution and blob uri mapping.
//!
//! Virtual directories are a naming convention over flat keys: a prefix and a
//! `/` separator. Nothing here normalizes `..` or collapses duplicate
//! separators.

use percent_encoding::percent_decode_str;
use thiserror::Error;
use url::Url;

/// Resolve `name` against the instance-level virtual root.
///
/// Prefixing is skipped when the root is unset/empty or the caller opts out.
pub fn resolve_key(virtual_root: Option<&str>, name: &str, use_virtual_directory: bool) -> String {
    if !use_virtual_directory {
        return name.to_string();
    }
    resolve_in_directory(virtual_root, name)
}

/// Resolve `name` against an explicit virtual directory.
pub fn resolve_in_directory(virtual_directory: Option<&str>, name: &str) -> String {
    match virtual_directory {
        Some(dir) if !dir.is_empty() => format!("{}/{}", dir.trim_end_matches('/'), name),
        _ => name.to_string(),
    }
}

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("invalid endpoint url: {0}")]
    Parse(#[from] url::ParseError),
    #[error("endpoint `{0}` cannot carry a path")]
    NotABase(String),
}

/// Container and key a blob uri points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobLocation {
    pub container: String,
    pub key: String,
}

/// Base url of a storage account's blob service.
///
/// Containers live at `{base}/{container}`, blobs at
/// `{base}/{container}/{key}` with every key segment percent-encoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceEndpoint {
    base: Url,
}

impl ServiceEndpoint {
    pub fn parse(value: &str) -> Result<Self, EndpointError> {
        let mut base = Url::parse(value)?;
        if base.cannot_be_a_base() {
            return Err(EndpointError::NotABase(value.to_string()));
        }
        base.set_query(None);
        base.set_fragment(None);
        Ok(Self { base })
    }

    pub fn url(&self) -> &Url {
        &self.base
    }

    pub fn container_uri(&self, container: &str) -> Url {
        self.with_segments(std::iter::once(container))
    }

    pub fn blob_uri(&self, container: &str, key: &str) -> Url {
        self.with_segments(std::iter::once(container).chain(key.split('/')))
    }

    fn with_segments<'a>(&self, segments: impl Iterator<Item = &'a str>) -> Url {
        let mut uri = self.base.clone();
        // `parse` rejects cannot-be-a-base urls, so this always succeeds.
        if let Ok(mut path) = uri.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments);
        }
        uri
    }

    /// Map a blob uri back to its container and key.
    ///
    /// Returns `None` for uris outside this endpoint or without a key. Any
    /// query string (e.g. a SAS) is ignored.
    pub fn locate(&self, uri: &Url) -> Option<BlobLocation> {
        if uri.scheme() != self.base.scheme()
            || uri.host_str() != self.base.host_str()
            || uri.port_or_known_default() != self.base.port_or_known_default()
        {
            return None;
        }

        let base_segments: Vec<&str> = self
            .base
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        let mut segments = uri.path_segments()?;
        for expected in &base_segments {
            if segments.next()? != *expected {
                return None;
            }
        }

        let container = decode(segments.next()?)?;
        let key = segments.map(decode).collect::<Option<Vec<_>>>()?.join("/");
        if container.is_empty() || key.is_empty() {
            return None;
        }
        Some(BlobLocation { container, key })
    }
}

fn decode(segment: &str) -> Option<String> {
    percent_decode_str(segment)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}
