//! Test fixtures for generating test data and requests.

use axum::body::Body;
use axum::http::Request;
use bytes::Bytes;
use chunklog_core::ContentHash;

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// SHA-256 of data as hex.
#[allow(dead_code)]
pub fn sha256_hash(data: &[u8]) -> String {
    ContentHash::compute(data).to_hex()
}

/// Split `data` into transport units of the given sizes; the remainder is
/// the last unit.
#[allow(dead_code)]
pub fn split_units(data: &Bytes, sizes: &[usize]) -> Vec<Bytes> {
    let mut units = Vec::with_capacity(sizes.len() + 1);
    let mut offset = 0;
    for size in sizes {
        units.push(data.slice(offset..offset + size));
        offset += size;
    }
    if offset < data.len() {
        units.push(data.slice(offset..));
    }
    units
}

/// A body that delivers each unit as its own frame.
pub fn framed_body(units: Vec<Bytes>) -> Body {
    Body::from_stream(futures::stream::iter(
        units.into_iter().map(Ok::<_, std::io::Error>),
    ))
}

/// Upload headers in the accepted shape.
#[derive(Clone, Debug)]
pub struct UploadSpec {
    pub id: String,
    pub log_type: String,
    pub format: String,
    pub timestamp: String,
}

#[allow(dead_code)]
impl UploadSpec {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            log_type: "build".to_string(),
            format: "pb-zst".to_string(),
            timestamp: "20250101-1200".to_string(),
        }
    }

    pub fn timestamp(mut self, timestamp: &str) -> Self {
        self.timestamp = timestamp.to_string();
        self
    }

    pub fn format(mut self, format: &str) -> Self {
        self.format = format.to_string();
        self
    }

    pub fn request(&self, units: Vec<Bytes>) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri("/v1/logs/upload")
            .header("x-uuid", &self.id)
            .header("x-type", &self.log_type)
            .header("x-format", &self.format)
            .header("x-timestamp", &self.timestamp)
            .body(framed_body(units))
            .unwrap()
    }
}

#[allow(dead_code)]
pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}
