use bytes::Bytes;
use chunklog_core::{ContentHash, LogId, LogType, UploadTimestamp};
use chunklog_storage::{KeyValueStore, MemoryBackend, SqliteBackend};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[allow(dead_code)]
pub const TEST_RETENTION: time::Duration = time::Duration::days(1);

#[allow(dead_code)]
pub const TEST_STORAGE_TTL: Duration = Duration::from_secs(2 * 24 * 60 * 60);

/// Compute SHA-256 hash of data as hex string
#[allow(dead_code)]
pub fn sha256_hash(data: &[u8]) -> String {
    ContentHash::compute(data).to_hex()
}

/// Generate deterministic test data using a seeded pseudo-random generator
/// Same seed produces same output (reproducible tests)
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    // Simple LCG (Linear Congruential Generator)
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Split a payload into transport units of the given sizes; the remainder
/// becomes a final unit.
#[allow(dead_code)]
pub fn split_units(data: &Bytes, sizes: &[usize]) -> Vec<Bytes> {
    let mut units = Vec::new();
    let mut offset = 0;
    for &size in sizes {
        let end = (offset + size).min(data.len());
        units.push(data.slice(offset..end));
        offset = end;
    }
    if offset < data.len() {
        units.push(data.slice(offset..));
    }
    units
}

#[allow(dead_code)]
pub fn upload_parts(id: &str) -> (LogId, LogType, UploadTimestamp) {
    (
        LogId::parse(id).unwrap(),
        LogType::parse("build").unwrap(),
        UploadTimestamp::parse("20250101-1200").unwrap(),
    )
}

#[allow(dead_code)]
pub fn memory_store() -> Arc<dyn KeyValueStore> {
    Arc::new(MemoryBackend::with_visibility_timeout(Duration::from_millis(200)))
}

#[allow(dead_code)]
pub async fn sqlite_store(dir: &Path) -> Arc<dyn KeyValueStore> {
    Arc::new(
        SqliteBackend::new(
            dir.join("kv.db"),
            Duration::from_millis(20),
            Duration::from_millis(200),
        )
        .await
        .unwrap(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hash() {
        let data = b"hello world";
        let hash = sha256_hash(data);
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_seeded_bytes_deterministic() {
        let data1 = seeded_bytes(42, 1000);
        let data2 = seeded_bytes(42, 1000);
        assert_eq!(data1, data2);
    }

    #[test]
    fn test_split_units_keeps_remainder() {
        let data = seeded_bytes(1, 10);
        let units = split_units(&data, &[4, 4]);
        let lens: Vec<usize> = units.iter().map(|u| u.len()).collect();
        assert_eq!(lens, vec![4, 4, 2]);
    }
}
