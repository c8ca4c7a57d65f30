//! Server-sent upload notifications.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use chunklog_core::{WATCH_EVENT_NAME, WatchFormat};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;

#[derive(Debug, Default, Deserialize)]
pub struct WatchQuery {
    pub fmt: Option<String>,
}

/// GET /v1/logs/watch?fmt={text|html} - Push one `logupload` event per
/// committed upload.
///
/// A missing, unknown or unparseable `fmt` (including a repeated one) falls
/// back to text. The stream opens with the current latest upload, if there
/// is one.
#[tracing::instrument(skip(state, query), fields(format))]
pub async fn watch_logs(
    State(state): State<AppState>,
    query: Result<Query<WatchQuery>, QueryRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let query = query
        .inspect_err(|e| tracing::debug!(error = %e, "unparseable watch query"))
        .map(|Query(query)| query)
        .unwrap_or_default();
    let format = WatchFormat::from_query(query.fmt.as_deref());
    tracing::Span::current().record("format", format.as_str());

    let events = state.fanout.subscribe(format).await?;
    // The fanout ends the stream after its first error.
    let stream = events.filter_map(|item| async move {
        item.ok()
            .map(|data| Ok(Event::default().event(WATCH_EVENT_NAME).data(data)))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.config.server.watch_keep_alive())
            .text("keep-alive"),
    ))
}
