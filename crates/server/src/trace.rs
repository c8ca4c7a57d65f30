//! Request correlation.
//!
//! Every request runs inside a `request` span carrying a trace id, taken
//! from the `x-trace-id` header when the client sends one. The id is echoed
//! on the response.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the trace id in both directions.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Longer client-supplied ids are truncated.
const MAX_TRACE_ID_LEN: usize = 128;

/// Trace id for request correlation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceId(String);

impl TraceId {
    /// Generate a new random trace id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept a client-supplied id, keeping at most [`MAX_TRACE_ID_LEN`]
    /// printable ASCII characters. An id with nothing left is replaced.
    pub fn from_client(value: &str) -> Self {
        // Count characters, not bytes, so multi-byte input never splits.
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.trim().is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn extract_or_generate(req: &Request) -> TraceId {
    req.headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_default()
}

/// Attach a trace id to the request, run it in a span, echo the id back.
pub async fn trace_id_middleware(mut req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate(&req);
    req.extensions_mut().insert(trace_id.clone());

    let span = tracing::info_span!(
        "request",
        trace_id = %trace_id,
        method = %req.method(),
        path = %req.uri().path(),
    );
    let mut response = next.run(req).instrument(span).await;

    // Sanitized ids are printable ASCII, so this only fails for ids we never produce.
    if let Ok(value) = HeaderValue::from_str(trace_id.as_str()) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}
