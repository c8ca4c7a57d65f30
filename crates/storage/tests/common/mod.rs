pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::{
    TEST_RETENTION, TEST_STORAGE_TTL, memory_store, seeded_bytes, sha256_hash, split_units,
    sqlite_store, upload_parts,
};
#[allow(unused_imports)]
pub use mocks::InstrumentedStore;
