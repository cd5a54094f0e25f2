//! Range streaming of swarm resources
//!
//! Requests go through `resolve_range_request` against a `LocalSwarm`, the
//! same path the HTTP surface takes.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, Method, StatusCode};
use bytes::Bytes;
use futures_util::{stream, StreamExt, TryStreamExt};
use sha2::{Digest, Sha256};

use syncwatch::stream::{resolve_range_request, ByteRange, RangeResponse};
use syncwatch::swarm::{
    AddOptions, ByteStream, MemoryFile, Resource, ResourceFile, ResourceId, SwarmEngine,
    SwarmError,
};
use syncwatch::LocalSwarm;

const TIMEOUT: Duration = Duration::from_secs(1);

fn pattern(length: usize) -> Vec<u8> {
    (0..length).map(|i| (i % 253) as u8).collect()
}

fn memory_swarm(data: &[u8]) -> (Arc<LocalSwarm>, ResourceId) {
    let swarm = LocalSwarm::new();
    let id = ResourceId::from_digest(&Sha256::digest(data));
    swarm.add_resource(Resource::new(
        id.clone(),
        vec![Arc::new(
            MemoryFile::new("movie.mp4", data.to_vec(), "video/mp4").with_chunk_size(64),
        )],
    ));
    (swarm, id)
}

async fn body(response: RangeResponse) -> Vec<u8> {
    let chunks: Vec<Bytes> = response
        .body
        .expect("response should have a body")
        .try_collect()
        .await
        .expect("stream error");
    chunks.concat()
}

/// Test: Partial content
/// Given a 1000-byte resource
/// When bytes=100-199 is requested
/// Then the response is 206 with exactly those 100 bytes
#[tokio::test]
async fn test_partial_content() {
    let data = pattern(1000);
    let (swarm, id) = memory_swarm(&data);

    let response = resolve_range_request(
        swarm.as_ref(),
        &id,
        &Method::GET,
        Some("bytes=100-199"),
        TIMEOUT,
    )
    .await
    .unwrap();

    assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.range, Some(ByteRange::new(100, 199)));
    assert_eq!(response.headers[header::CONTENT_RANGE], "bytes 100-199/1000");
    assert_eq!(response.headers[header::CONTENT_LENGTH], "100");
    assert_eq!(body(response).await, &data[100..200]);
}

/// Test: Invalid ranges fall back to the full resource
/// Given a 1000-byte resource
/// When a reversed, out-of-bounds or malformed range is requested
/// Then the response is 200 with the whole resource
#[tokio::test]
async fn test_invalid_ranges_serve_full_resource() {
    let data = pattern(1000);
    let (swarm, id) = memory_swarm(&data);

    for range in ["bytes=900-100", "bytes=0-1000", "bytes=2000-", "items=0-9", "garbage"] {
        let response =
            resolve_range_request(swarm.as_ref(), &id, &Method::GET, Some(range), TIMEOUT)
                .await
                .unwrap();

        assert_eq!(response.status, StatusCode::OK, "range {}", range);
        assert_eq!(response.headers[header::CONTENT_LENGTH], "1000");
        assert!(response.headers.get(header::CONTENT_RANGE).is_none());
        assert_eq!(body(response).await, data);
    }
}

/// Test: Open-ended and suffix ranges
/// Given a 1000-byte resource
/// When bytes=990- and bytes=-5 are requested
/// Then the tail of the resource is served as partial content
#[tokio::test]
async fn test_open_and_suffix_ranges() {
    let data = pattern(1000);
    let (swarm, id) = memory_swarm(&data);

    let response = resolve_range_request(
        swarm.as_ref(),
        &id,
        &Method::GET,
        Some("bytes=990-"),
        TIMEOUT,
    )
    .await
    .unwrap();
    assert_eq!(response.headers[header::CONTENT_RANGE], "bytes 990-999/1000");
    assert_eq!(body(response).await, &data[990..]);

    let response =
        resolve_range_request(swarm.as_ref(), &id, &Method::GET, Some("bytes=-5"), TIMEOUT)
            .await
            .unwrap();
    assert_eq!(response.headers[header::CONTENT_RANGE], "bytes 995-999/1000");
    assert_eq!(body(response).await, &data[995..]);
}

/// Test: HEAD requests
/// When a HEAD request carries a range
/// Then headers are computed and no body is produced
#[tokio::test]
async fn test_head_request() {
    let (swarm, id) = memory_swarm(&pattern(1000));

    let response = resolve_range_request(
        swarm.as_ref(),
        &id,
        &Method::HEAD,
        Some("bytes=0-499"),
        TIMEOUT,
    )
    .await
    .unwrap();

    assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers[header::CONTENT_LENGTH], "500");
    assert_eq!(response.headers[header::CONTENT_TYPE], "video/mp4");
    assert!(response.body.is_none());
}

/// Test: Seeded file on disk
/// Given a file seeded from disk
/// When a range inside it is requested
/// Then the bytes come from the file at that offset
#[tokio::test]
async fn test_seeded_file_range() {
    let data = pattern(10_000);
    let mut file = tempfile::Builder::new()
        .suffix(".webm")
        .tempfile()
        .unwrap();
    file.write_all(&data).unwrap();
    file.flush().unwrap();

    let swarm = LocalSwarm::new();
    let resource = swarm.seed_file(file.path()).await.unwrap();

    let response = resolve_range_request(
        swarm.as_ref(),
        resource.id(),
        &Method::GET,
        Some("bytes=4096-8191"),
        TIMEOUT,
    )
    .await
    .unwrap();

    assert_eq!(response.headers[header::CONTENT_TYPE], "video/webm");
    assert_eq!(body(response).await, &data[4096..8192]);
}

/// Test: Waiting for metadata
/// Given a resource that is not yet known
/// When it is added while a request is pending
/// Then the request completes with the resource
#[tokio::test]
async fn test_request_waits_for_metadata() {
    let data = pattern(100);
    let swarm = LocalSwarm::new();
    let id = ResourceId::from_digest(&Sha256::digest(&data));

    let pending = {
        let swarm = swarm.clone();
        let id = id.clone();
        tokio::spawn(async move {
            resolve_range_request(swarm.as_ref(), &id, &Method::GET, None, TIMEOUT).await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    swarm.add_resource(Resource::new(
        id,
        vec![Arc::new(MemoryFile::new("late.bin", data.clone(), "application/octet-stream"))],
    ));

    let response = pending.await.unwrap().unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(body(response).await, data);
}

/// Test: Metadata timeout
/// Given a resource that never appears
/// When the metadata timeout elapses
/// Then the request fails with a timeout error
#[tokio::test(start_paused = true)]
async fn test_metadata_timeout() {
    let swarm = LocalSwarm::new();
    let id = ResourceId::from_digest(&[1u8; 32]);

    let result = resolve_range_request(
        swarm.as_ref(),
        &id,
        &Method::GET,
        None,
        Duration::from_secs(30),
    )
    .await;

    assert!(matches!(result, Err(SwarmError::MetadataTimeout(_))));
}

/// Resource file that counts how many chunks its streams produced
struct CountingFile {
    pulled: Arc<AtomicUsize>,
}

impl ResourceFile for CountingFile {
    fn name(&self) -> &str {
        "endless.bin"
    }

    fn length(&self) -> u64 {
        1 << 30
    }

    fn mime_type(&self) -> String {
        "application/octet-stream".to_string()
    }

    fn open_byte_stream(&self, _range: Option<ByteRange>) -> Result<ByteStream, SwarmError> {
        let pulled = self.pulled.clone();
        Ok(Box::pin(stream::repeat_with(move || {
            pulled.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::io::Error>(Bytes::from_static(&[0u8; 1024]))
        })))
    }
}

/// Test: Client disconnect stops the stream
/// Given a large resource streamed chunk by chunk
/// When the consumer stops after a few chunks and drops the body
/// Then no further chunks are pulled from the source
#[tokio::test]
async fn test_dropping_body_stops_pulls() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let swarm = LocalSwarm::new();
    let id = ResourceId::from_digest(&[2u8; 32]);
    swarm.add_resource(Resource::new(
        id.clone(),
        vec![Arc::new(CountingFile {
            pulled: pulled.clone(),
        })],
    ));

    let response = resolve_range_request(swarm.as_ref(), &id, &Method::GET, None, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(pulled.load(Ordering::SeqCst), 0, "Stream must be lazy");

    let mut body = response.body.unwrap();
    for _ in 0..3 {
        body.next().await.unwrap().unwrap();
    }
    drop(body);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(pulled.load(Ordering::SeqCst), 3);
}

/// Test: Seeder lookup
/// When a seeder asks for an unknown resource
/// Then it fails immediately instead of waiting
#[tokio::test]
async fn test_seeder_lookup_does_not_wait() {
    let swarm = LocalSwarm::new();
    let id = ResourceId::from_digest(&[3u8; 32]);

    let result = swarm.add_or_get(&id, AddOptions { as_seeder: true }).await;
    assert!(matches!(result, Err(SwarmError::ResourceNotFound(_))));
}
