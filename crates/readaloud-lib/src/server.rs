//! HTTP control API for the reader.
//!
//! Runs on port 2004 by default. CORS-permissive so a browser extension or
//! local page can drive it.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;

use readaloud_core::dom::NodeId;
use readaloud_core::text_prep::{preview, word_start_offset};
use readaloud_core::types::{ReaderStatus, Theme, TtsSettings};

use crate::context::ReaderContext;

pub const DEFAULT_PORT: u16 = 2004;

/// Build the axum router over a shared [`ReaderContext`].
pub fn router(ctx: ReaderContext) -> Router {
    Router::new()
        .route("/read", post(read))
        .route("/stop", post(stop))
        .route("/pause", post(pause))
        .route("/status", get(status))
        .route("/settings", get(get_settings).post(update_settings))
        .route("/theme", post(set_theme))
        .route("/voices", get(voices))
        .route("/elements", get(elements))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
}

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            ok: false,
            error: error.into(),
        }),
    )
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ReadRequest {
    /// Element to start from; the first readable element when absent.
    element: Option<usize>,
    /// Character position inside the element; reading starts at the word
    /// containing it.
    caret: usize,
}

#[derive(Serialize)]
struct ReadResponse {
    ok: bool,
    session: u64,
    element: usize,
    offset: usize,
}

async fn read(
    State(ctx): State<ReaderContext>,
    body: Bytes,
) -> Result<Json<ReadResponse>, ApiError> {
    let req: ReadRequest = if body.is_empty() {
        ReadRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?
    };

    let start = match req.element {
        Some(id) => ctx.page.first_readable(NodeId(id)),
        None => ctx.page.readable_elements().first().copied(),
    }
    .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "no readable element"))?;

    let text = ctx.page.text_content(start);
    let offset = word_start_offset(&text, req.caret);
    info!("read request: element {} at \"{}\"", start.0, preview(&text));

    let handle = ctx.reader.start_reading(start, offset).await;
    Ok(Json(ReadResponse {
        ok: handle.is_started(),
        session: handle.id(),
        element: start.0,
        offset,
    }))
}

async fn stop(State(ctx): State<ReaderContext>) -> Json<OkResponse> {
    ctx.reader.clear_previous_session();
    Json(OkResponse { ok: true })
}

async fn pause(State(ctx): State<ReaderContext>) -> Json<OkResponse> {
    ctx.state.set_reading(false);
    Json(OkResponse { ok: true })
}

async fn status(State(ctx): State<ReaderContext>) -> Json<ReaderStatus> {
    Json(ctx.status())
}

async fn get_settings(State(ctx): State<ReaderContext>) -> Json<TtsSettings> {
    Json(ctx.settings.get_settings().await)
}

/// Partial settings update; absent or empty fields keep their value.
#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct SettingsPatch {
    api_base: String,
    voice: String,
    speed: f32,
    api_key: Option<String>,
    model: Option<String>,
}

async fn update_settings(
    State(ctx): State<ReaderContext>,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<TtsSettings>, ApiError> {
    if patch.speed < 0.0 || !patch.speed.is_finite() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("speed must be positive, got {}", patch.speed),
        ));
    }

    let mut settings = ctx.settings.get_settings().await;
    settings.merge_from(&TtsSettings {
        api_base: patch.api_base,
        voice: patch.voice,
        speed: patch.speed,
        api_key: patch.api_key,
        model: patch.model,
    });

    ctx.settings
        .update_settings(settings.clone())
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(Json(settings))
}

#[derive(Deserialize)]
struct ThemeRequest {
    theme: Theme,
}

#[derive(Serialize)]
struct ThemeResponse {
    ok: bool,
    theme: Theme,
}

async fn set_theme(
    State(ctx): State<ReaderContext>,
    Json(req): Json<ThemeRequest>,
) -> Json<ThemeResponse> {
    ctx.state.set_theme(req.theme);
    Json(ThemeResponse {
        ok: true,
        theme: req.theme,
    })
}

#[derive(Serialize)]
struct VoicesResponse {
    voices: Vec<String>,
}

async fn voices(State(ctx): State<ReaderContext>) -> Json<VoicesResponse> {
    ctx.audio.ensure_initialized().await;
    let voices = ctx.api.list_voices(&ctx.audio.settings_snapshot()).await;
    Json(VoicesResponse { voices })
}

#[derive(Serialize)]
struct ElementInfo {
    id: usize,
    text: String,
}

async fn elements(State(ctx): State<ReaderContext>) -> Json<Vec<ElementInfo>> {
    let list = ctx
        .page
        .readable_elements()
        .into_iter()
        .map(|id| ElementInfo {
            id: id.0,
            text: ctx.page.text_content(id),
        })
        .collect();
    Json(list)
}
