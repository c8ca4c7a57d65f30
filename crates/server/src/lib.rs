//! HTTP front end for chunklog.
//!
//! This crate provides:
//! - Streamed log upload into the chunk store
//! - Log retrieval with a content-addressed response cache
//! - Server-sent upload notifications
//! - Health and Prometheus endpoints

pub mod cache;
pub mod error;
pub mod fanout;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod trace;

pub use cache::{CacheKey, CachedResponse, ResponseCache};
pub use error::{ApiError, ApiResult};
pub use fanout::WatchFanout;
pub use routes::create_router;
pub use state::AppState;
pub use trace::TraceId;
