use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{Json, Router, extract::Query, http::header, response::IntoResponse};
use axum::{http::StatusCode, response::Response};
use axum::{routing::get, routing::post};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use super::AppState;
use axum::extract::State;

#[derive(Debug, Deserialize)]
pub struct TailParams {
    pub lines: Option<usize>,
}

pub async fn logs_tail(
    State(state): State<AppState>,
    Query(params): Query<TailParams>,
) -> impl IntoResponse {
    let max_lines = params.lines.unwrap_or(200).min(10_000);
    let Some(path) = resolve_log_file_path(&state.config.logging.file).await else {
        return (StatusCode::NOT_FOUND, "Log file not available").into_response();
    };
    match fs::read_to_string(&path).await {
        Ok(contents) => {
            let lines: Vec<&str> = contents.lines().collect();
            let start = lines.len().saturating_sub(max_lines);
            let mut resp = Response::new(lines[start..].join("\n").into());
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            resp
        }
        Err(_) => (StatusCode::NOT_FOUND, "Log file not available").into_response(),
    }
}

/// SSE stream of formatted log lines at or above the runtime web level
pub async fn logs_stream() -> impl IntoResponse {
    let rx = crate::logging::subscribe_log_lines();
    let stream = BroadcastStream::new(rx).filter_map(|res| match res {
        Ok(line) if crate::logging::should_emit_to_web(&line) => {
            Some(Ok::<Event, std::convert::Infallible>(
                Event::default().event("log").data(line),
            ))
        }
        // Lagged receivers skip what they missed
        _ => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Whether a directory entry is one of the rotated log files
fn name_matches(file_name: &str, prefix: &str) -> bool {
    file_name.starts_with(prefix) && file_name.contains(".log")
}

async fn latest_matching(dir: &Path, prefix: &str) -> Option<PathBuf> {
    let mut best: Option<(SystemTime, PathBuf)> = None;
    let mut rd = fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = rd.next_entry().await {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if !name_matches(&name, prefix) {
            continue;
        }
        let Ok(md) = entry.metadata().await else {
            continue;
        };
        if !md.is_file() {
            continue;
        }
        if let Ok(modified) = md.modified()
            && best.as_ref().is_none_or(|(t, _)| modified > *t)
        {
            best = Some((modified, entry.path()));
        }
    }
    best.map(|(_, p)| p)
}

// The appender writes date-suffixed files next to the configured path, so
// pick the configured file if it exists, else the newest rotated sibling.
async fn resolve_log_file_path(configured: &str) -> Option<PathBuf> {
    let path = Path::new(configured);
    if let Ok(md) = fs::metadata(path).await
        && md.is_file()
    {
        return Some(path.to_path_buf());
    }
    let dir = crate::logging::log_directory(configured);
    let prefix = crate::logging::log_file_prefix(configured);
    latest_matching(dir, &prefix).await
}

#[derive(Deserialize)]
struct WebLevelQuery {
    level: String,
}

async fn set_web_log_level(Query(q): Query<WebLevelQuery>) -> impl IntoResponse {
    match crate::logging::set_web_log_level_str(&q.level) {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({"ok": true, "level": q.level})),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"ok": false, "error": e.to_string()})),
        ),
    }
}

async fn get_web_log_level() -> impl IntoResponse {
    let lvl = crate::logging::get_web_log_level();
    Json(serde_json::json!({"level": lvl.to_string()}))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/logs/tail", get(logs_tail))
        .route("/api/logs/stream", get(logs_stream))
        .route(
            "/api/logs/web_level",
            post(set_web_log_level).get(get_web_log_level),
        )
}
