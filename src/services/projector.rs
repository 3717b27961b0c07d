//! Merges "take from source" requests with explicit override values.

use crate::models::{
    headers::{HeaderMap, HeaderValue, PropertyBag},
    requests::{HttpHeadersRequest, PropertiesRequest},
};
use std::future::Future;

/// Metadata and headers to apply to a copy target.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Projection {
    pub metadata: Option<PropertyBag>,
    pub headers: Option<HeaderMap>,
}

/// Build the metadata and header sets for a copy target.
///
/// `fetch` is called at most once, with the union of both take-lists, and
/// only when a name is requested from the source. Names absent on the source
/// are skipped. Values to add are applied last and always win.
pub async fn project<F, Fut, E>(
    properties: Option<&PropertiesRequest>,
    headers: Option<&HttpHeadersRequest>,
    fetch: F,
) -> Result<Projection, E>
where
    F: FnOnce(Vec<String>) -> Fut,
    Fut: Future<Output = Result<PropertyBag, E>>,
{
    if properties.is_none() && headers.is_none() {
        return Ok(Projection::default());
    }

    let mut wanted: Vec<String> = Vec::new();
    for name in properties
        .map(|p| p.take_from_source.as_slice())
        .unwrap_or_default()
        .iter()
        .chain(headers.map(|h| h.take_from_source.as_slice()).unwrap_or_default())
    {
        if !wanted.contains(name) {
            wanted.push(name.clone());
        }
    }

    let source = if wanted.is_empty() {
        PropertyBag::new()
    } else {
        fetch(wanted).await?
    };

    let metadata = properties.map(|request| {
        let mut merged: PropertyBag = request
            .take_from_source
            .iter()
            .filter_map(|name| source.get(name).map(|v| (name.clone(), v.clone())))
            .collect();
        merged.extend(request.values_to_add.clone());
        merged
    });

    let headers = headers.map(|request| {
        let mut merged: HeaderMap = request
            .take_from_source
            .iter()
            .filter_map(|name| {
                source
                    .get(name)
                    .map(|v| (name.clone(), HeaderValue::Text(v.clone())))
            })
            .collect();
        merged.extend(request.values_to_add.clone());
        merged
    });

    Ok(Projection { metadata, headers })
}
