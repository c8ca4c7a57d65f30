//! Landing page and health check.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::response::Html;
use serde::Serialize;

const HOME_PAGE: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>chunklog</title>
  </head>
  <body>
    <main>
      <h2>Log uploads</h2>
      <div hx-ext="sse" sse-connect="/v1/logs/watch?fmt=html">
        <div sse-swap="logupload" hx-swap="afterbegin"></div>
      </div>
    </main>
    <script src="https://unpkg.com/htmx.org@2.0.0" crossorigin="anonymous"></script>
    <script src="https://unpkg.com/htmx-ext-sse@2.0.0/sse.js" crossorigin="anonymous"></script>
  </body>
</html>
"#;

/// GET / - Live list of uploads as they are committed.
pub async fn home_page() -> Html<&'static str> {
    Html(HOME_PAGE)
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backend: &'static str,
    pub version: &'static str,
}

/// GET /v1/health - Health check.
///
/// Fails with 500 when the store adapter cannot be reached.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.store.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        backend: state.store.backend_name(),
        version: env!("CARGO_PKG_VERSION"),
    }))
}
