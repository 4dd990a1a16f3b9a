use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::config::{Settings, SettingsStore, SettingsUpdate};
use crate::pipeline::{Pipeline, PipelineError, RunOutcome};
use crate::scheduler::{ActiveSchedule, ScheduleError, ScheduleInfo};
use crate::store::StoreError;

pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub settings: Arc<SettingsStore>,
    pub schedule: Arc<ActiveSchedule>,
    /// Admin routes are disabled when no token is configured
    pub admin_token: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/newsletters", get(list_newsletters))
        .route("/api/newsletter/latest", get(latest_newsletter))
        .route("/api/newsletter/generate", post(generate))
        .route("/api/newsletter/:date", get(newsletter_by_date))
        .route("/api/admin/login", post(login))
        .route("/api/admin/config", get(get_config).put(update_config))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Unauthorized,
    AdminDisabled,
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, "bad_request", message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, "conflict", message),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Missing or invalid admin token".to_string(),
            ),
            ApiError::AdminDisabled => (
                StatusCode::FORBIDDEN,
                "forbidden",
                "Admin access is not configured".to_string(),
            ),
            ApiError::Internal(err) => {
                error!("Request failed: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    err.to_string(),
                )
            }
        };

        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidDate(_) => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::AlreadyRunning => ApiError::Conflict(err.to_string()),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<ScheduleError> for ApiError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::InvalidCron(_) | ScheduleError::InvalidTimezone(_) => {
                ApiError::BadRequest(err.to_string())
            }
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": Utc::now() }))
}

pub async fn list_newsletters(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let newsletters = state.pipeline.store().list().await?;
    Ok(Json(json!({
        "count": newsletters.len(),
        "newsletters": newsletters,
    })))
}

pub async fn latest_newsletter(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .pipeline
        .store()
        .latest()
        .await?
        .ok_or_else(|| ApiError::NotFound("No newsletter has been generated yet".to_string()))?;
    Ok(Json(record))
}

pub async fn newsletter_by_date(
    State(state): State<Arc<AppState>>,
    Path(date): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .pipeline
        .store()
        .load(&date)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No newsletter for {}", date)))?;
    Ok(Json(record))
}

/// Runs the whole pipeline inside the request.
pub async fn generate(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let settings = state.settings.load().await?;
    info!("Manual digest generation requested");

    match state.pipeline.run(settings.send_on_generate).await? {
        RunOutcome::Aborted => Err(ApiError::NotFound(
            "No new articles found in the collection window".to_string(),
        )),
        RunOutcome::Completed(report) => Ok(Json(json!({
            "success": true,
            "message": "Newsletter generated",
            "date": report.date,
            "stats": report.stats,
            "data": report.digest,
        }))),
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let expected = state
        .admin_token
        .as_deref()
        .ok_or(ApiError::AdminDisabled)?;

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigView {
    #[serde(flatten)]
    settings: Settings,
    active_schedule: Option<ScheduleInfo>,
}

impl ConfigView {
    async fn new(state: &AppState, settings: Settings) -> Self {
        Self {
            settings,
            active_schedule: state.schedule.current().await,
        }
    }
}

/// Lets an admin client check its token before editing anything.
pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers)?;

    let settings = state.settings.load().await?;
    let config = ConfigView::new(&state, settings).await;
    Ok(Json(json!({
        "success": true,
        "message": "Login successful",
        "config": config,
    })))
}

pub async fn get_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers)?;

    let settings = state.settings.load().await?;
    Ok(Json(ConfigView::new(&state, settings).await))
}

/// The schedule is replaced before anything is saved, so a rejected cron
/// expression or timezone leaves both untouched.
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(update): Json<SettingsUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, &headers)?;

    if update.cron_schedule.is_some() || update.timezone.is_some() {
        let current = state.settings.load().await?;
        let cron = update
            .cron_schedule
            .as_deref()
            .unwrap_or(&current.cron_schedule)
            .trim();
        let timezone = update.timezone.as_deref().unwrap_or(&current.timezone).trim();

        let unchanged = matches!(
            state.schedule.current().await,
            Some(active) if active.expression == cron && active.timezone == timezone
        );
        if !unchanged {
            state.schedule.reconfigure(cron, timezone).await?;
        }
    }

    let settings = state.settings.update(update).await?;
    info!(
        schedule = %settings.cron_schedule,
        timezone = %settings.timezone,
        "Runtime settings updated"
    );

    let config = ConfigView::new(&state, settings).await;
    Ok(Json(json!({ "success": true, "config": config })))
}
