//! Log upload and retrieval handlers.

use crate::cache::{CacheKey, CachedResponse};
use crate::error::{ApiError, ApiResult};
use crate::metrics::{self, record_upload_error};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::BytesMut;
use chunklog_core::{LogId, LogType, UploadTimestamp};
use chunklog_storage::{CommitOutcome, StorageError};
use futures::StreamExt;
use std::time::Instant;

/// Content type of reconstructed log payloads.
pub const LOG_CONTENT_TYPE: &str = "application/octet-stream";

pub const HEADER_ID: &str = "x-uuid";
pub const HEADER_TYPE: &str = "x-type";
pub const HEADER_FORMAT: &str = "x-format";
pub const HEADER_TIMESTAMP: &str = "x-timestamp";

/// Validated upload request headers.
#[derive(Debug)]
struct UploadHeaders {
    id: LogId,
    log_type: LogType,
    timestamp: UploadTimestamp,
}

impl UploadHeaders {
    fn from_headers(headers: &HeaderMap, accepted_format: &str) -> ApiResult<Self> {
        let id = LogId::parse(required_header(headers, HEADER_ID)?)?;
        let log_type = LogType::parse(required_header(headers, HEADER_TYPE)?)?;

        let format = required_header(headers, HEADER_FORMAT)?;
        if format != accepted_format {
            return Err(chunklog_core::Error::UnsupportedFormat(format!(
                "{format:?}, expected {accepted_format:?}"
            ))
            .into());
        }

        let timestamp = UploadTimestamp::parse(required_header(headers, HEADER_TIMESTAMP)?)?;

        Ok(Self {
            id,
            log_type,
            timestamp,
        })
    }
}

fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> ApiResult<&'a str> {
    headers
        .get(name)
        .ok_or_else(|| ApiError::BadRequest(format!("missing header {name}")))?
        .to_str()
        .map_err(|_| ApiError::BadRequest(format!("header {name} is not valid UTF-8")))
}

fn storage_error_type(e: &StorageError) -> &'static str {
    match e {
        StorageError::Transport(_) => "client_aborted",
        StorageError::Database(_) => "database",
        StorageError::Io(_) => "io",
        StorageError::Serialization(_) => "serialization",
        _ => "storage",
    }
}

/// PUT /v1/logs/upload - Stream a log payload into chunks and commit its index.
///
/// Headers are validated before any body byte is read. The body is consumed
/// incrementally; each transport frame becomes one chunk.
#[tracing::instrument(skip(state, req), fields(log_id))]
pub async fn upload_log(State(state): State<AppState>, req: Request) -> ApiResult<Response> {
    let start_time = Instant::now();
    let headers = UploadHeaders::from_headers(req.headers(), &state.config.logs.accepted_format)
        .inspect_err(|_| record_upload_error("invalid_headers"))?;
    tracing::Span::current().record("log_id", tracing::field::display(&headers.id));

    let body = req.into_body().into_data_stream();
    let pending = match state
        .chunks
        .ingest(&headers.id, &headers.log_type, &headers.timestamp, body)
        .await
    {
        Ok(pending) => pending,
        Err(StorageError::AlreadyExists(prefix)) => {
            metrics::UPLOAD_CONFLICTS.inc();
            tracing::info!(prefix = %prefix, "upload prefix already taken");
            return Err(ApiError::Conflict(format!(
                "log {} is already being uploaded",
                headers.id
            )));
        }
        Err(e) => {
            record_upload_error(storage_error_type(&e));
            tracing::warn!(error = %e, "upload aborted");
            return Err(e.into());
        }
    };

    // Until the commit succeeds, every exit (including a dropped request)
    // gives the prefix reservation back.
    let record = state.index.record_for(headers.id.clone(), pending.outcome.clone());
    match state.index.commit(&record).await {
        Ok(CommitOutcome::Committed) => {
            pending.hold();
        }
        Ok(CommitOutcome::AlreadyExists) => {
            pending.release().await;
            metrics::UPLOAD_CONFLICTS.inc();
            tracing::info!("index record already committed by another upload");
            return Err(ApiError::Conflict(format!(
                "log {} already exists",
                headers.id
            )));
        }
        Err(e) => {
            pending.release().await;
            record_upload_error("commit");
            tracing::warn!(error = %e, "index commit failed");
            return Err(e.into());
        }
    }

    metrics::UPLOADS_COMMITTED.inc();
    metrics::BYTES_INGESTED.inc_by(record.size);
    metrics::CHUNKS_INGESTED.inc_by(record.chunk_count);
    metrics::UPLOAD_DURATION.observe(start_time.elapsed().as_secs_f64());

    tracing::info!(
        size = record.size,
        chunks = record.chunk_count,
        prefix = %record.key_prefix,
        "log upload committed"
    );

    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        "OK",
    )
        .into_response())
}

/// GET /v1/logs/get/{id} - Stream a committed log back.
///
/// Served from the response cache when possible. On a miss the first chunk
/// is read before the status line is sent; the complete response is cached
/// once the stream finishes with the expected size.
#[tracing::instrument(skip(state, rest, method, uri), fields(log_id = %rest))]
pub async fn get_log(
    State(state): State<AppState>,
    Path(rest): Path<String>,
    method: Method,
    uri: Uri,
) -> ApiResult<Response> {
    let start_time = Instant::now();
    if rest.contains('/') {
        return Err(ApiError::BadRequest(format!(
            "expected a single log id segment, got {rest:?}"
        )));
    }
    let id = LogId::parse(&rest)?;

    let cache_key = CacheKey::for_request(&method, &uri);
    if let Some(cached) = state.cache.get(&cache_key).await {
        metrics::CACHE_HITS.inc();
        metrics::RETRIEVALS_SERVED.inc();
        tracing::debug!(size = cached.body.len(), "serving log from response cache");
        return Ok((
            StatusCode::OK,
            [
                (CONTENT_TYPE, cached.content_type.as_str()),
                (CONTENT_LENGTH, &cached.body.len().to_string()),
            ],
            cached.body,
        )
            .into_response());
    }
    if state.cache.is_enabled() {
        metrics::CACHE_MISSES.inc();
    }

    let record = state
        .index
        .lookup(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("log not found: {id}")))?;

    let mut chunks = match state
        .chunks
        .retrieve(&record.key_prefix, record.size, record.chunk_count)
        .await
    {
        Ok(chunks) => chunks,
        Err(e @ StorageError::Truncated { .. }) => {
            metrics::RETRIEVAL_ERRORS.inc();
            tracing::error!(error = %e, "committed log has no readable chunks");
            return Err(ApiError::NotFound(format!("log data missing: {id}")));
        }
        Err(e) => {
            metrics::RETRIEVAL_ERRORS.inc();
            return Err(e.into());
        }
    };
    metrics::RETRIEVAL_PREFLIGHT_DURATION.observe(start_time.elapsed().as_secs_f64());
    metrics::RETRIEVALS_SERVED.inc();

    let cache = state.cache.clone();
    let admit = cache.admits(record.size);
    let expected = record.size;
    let body = async_stream::stream! {
        let mut buffer = admit.then(|| BytesMut::with_capacity(expected as usize));
        while let Some(item) = chunks.next().await {
            match item {
                Ok(chunk) => {
                    if let Some(buffer) = buffer.as_mut() {
                        buffer.extend_from_slice(&chunk);
                    }
                    yield Ok(chunk);
                }
                Err(e) => {
                    if matches!(e, StorageError::SizeMismatch { .. }) {
                        metrics::RETRIEVAL_SIZE_MISMATCHES.inc();
                    } else {
                        metrics::RETRIEVAL_ERRORS.inc();
                        tracing::error!(error = %e, "log streaming failed mid-transfer");
                    }
                    yield Err(std::io::Error::other(e.to_string()));
                    return;
                }
            }
        }

        if let Some(buffer) = buffer {
            let response = CachedResponse {
                body: buffer.freeze(),
                content_type: LOG_CONTENT_TYPE.to_string(),
            };
            cache.insert(cache_key, response).await;
        }
    };

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, LOG_CONTENT_TYPE),
            (CONTENT_LENGTH, &record.size.to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

/// Fallback for unmatched paths.
///
/// Retrieval paths without an id are malformed requests rather than
/// unknown routes.
pub async fn fallback(uri: Uri) -> ApiError {
    let path = uri.path();
    if path == "/v1/logs/get" || path.starts_with("/v1/logs/get/") {
        ApiError::BadRequest("missing log id".to_string())
    } else {
        ApiError::NotFound(format!("no route for {path}"))
    }
}
