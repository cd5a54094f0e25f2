//! Range-aware responses over a resource's first file

use std::fmt;
use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use tracing::debug;

use super::range::{select_range, ByteRange};
use crate::swarm::{AddOptions, ByteStream, ResourceFile, ResourceId, SwarmEngine, SwarmError};

/// Status, headers and body for one resource request
pub struct RangeResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Span being served, `None` for the whole resource
    pub range: Option<ByteRange>,
    /// Absent for HEAD requests
    pub body: Option<ByteStream>,
}

impl fmt::Debug for RangeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("range", &self.range)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Build the response for `file`
///
/// An absent, malformed or unsatisfiable range header yields the full resource
/// with `200 OK`; this never produces a client error.
pub fn respond(
    file: &dyn ResourceFile,
    method: &Method,
    range_header: Option<&str>,
) -> Result<RangeResponse, SwarmError> {
    let length = file.length();
    let range = select_range(range_header, length);

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&file.mime_type()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    let status = match range {
        Some(range) => {
            if let Ok(value) = HeaderValue::from_str(&range.content_range(length)) {
                headers.insert(header::CONTENT_RANGE, value);
            }
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(range.len()));
            StatusCode::PARTIAL_CONTENT
        }
        None => {
            if let Some(requested) = range_header {
                debug!("Serving full resource for unusable range {:?}", requested);
            }
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            StatusCode::OK
        }
    };

    let body = if *method == Method::HEAD {
        None
    } else {
        Some(file.open_byte_stream(range)?)
    };

    Ok(RangeResponse {
        status,
        headers,
        range,
        body,
    })
}

/// Look up a resource in the swarm and build the response for its first file
///
/// Fails if the resource has no files or its metadata does not arrive within
/// `metadata_timeout`.
pub async fn resolve_range_request(
    engine: &dyn SwarmEngine,
    id: &ResourceId,
    method: &Method,
    range_header: Option<&str>,
    metadata_timeout: Duration,
) -> Result<RangeResponse, SwarmError> {
    let resource = tokio::time::timeout(
        metadata_timeout,
        engine.add_or_get(id, AddOptions::default()),
    )
    .await
    .map_err(|_| SwarmError::MetadataTimeout(metadata_timeout))??;

    let file = resource
        .files()
        .first()
        .ok_or_else(|| SwarmError::ResourceNotFound(id.to_string()))?;

    respond(file.as_ref(), method, range_header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::MemoryFile;
    use futures_util::TryStreamExt;

    fn file() -> MemoryFile {
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        MemoryFile::new("clip.mp4", data, "video/mp4")
    }

    async fn collect(response: RangeResponse) -> Vec<u8> {
        let body = response.body.expect("response should have a body");
        let chunks: Vec<_> = body.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn test_partial_response() {
        let file = file();
        let response = respond(&file, &Method::GET, Some("bytes=100-199")).unwrap();

        assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers[header::CONTENT_RANGE], "bytes 100-199/1000");
        assert_eq!(response.headers[header::CONTENT_LENGTH], "100");
        assert_eq!(response.headers[header::ACCEPT_RANGES], "bytes");
        assert_eq!(response.headers[header::CONTENT_TYPE], "video/mp4");

        let bytes = collect(response).await;
        assert_eq!(bytes.len(), 100);
        assert_eq!(bytes, &file.data()[100..200]);
    }

    #[tokio::test]
    async fn test_full_response_without_range() {
        let file = file();
        let response = respond(&file, &Method::GET, None).unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.headers[header::CONTENT_LENGTH], "1000");
        assert!(response.headers.get(header::CONTENT_RANGE).is_none());
        assert_eq!(collect(response).await.len(), 1000);
    }

    #[tokio::test]
    async fn test_invalid_range_falls_back() {
        let file = file();
        let response = respond(&file, &Method::GET, Some("bytes=900-100")).unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.headers[header::CONTENT_LENGTH], "1000");
        assert!(response.range.is_none());
    }

    #[test]
    fn test_head_has_no_body() {
        let file = file();
        let response = respond(&file, &Method::HEAD, Some("bytes=100-199")).unwrap();

        assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers[header::CONTENT_LENGTH], "100");
        assert!(response.body.is_none());
    }
}
