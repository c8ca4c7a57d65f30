//! Key-value store adapters.

pub mod memory;
pub mod sqlite;
