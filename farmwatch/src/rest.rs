use crate::advisor::{Advisor, AdvisorReply, ChatMessage, FarmContext, Weather};
use crate::backend::Backend;
use crate::chart::{self, ChartGeometry, TimeWindow};
use crate::counters::{CounterKind, CounterSnapshot};
use crate::db;
use crate::demo::{DemoEntry, DemoGate};
use crate::errors::Error;
use crate::live::LiveHandle;
use crate::model::{Farm, FarmId, RequestStatus, Sensor, SensorId, SensorKind, UserId};
use crate::mqtt::PushPublisher;
use crate::requests::{self, PendingRequests, ReviewTarget};
use crate::status::{self, Status};
use crate::storage::FileStore;
use crate::tutorial::{Tutorial, TutorialState, TutorialStep};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, warn};

const DEFAULT_CHART_WIDTH: f64 = 320.0;
const DEFAULT_CHART_HEIGHT: f64 = 180.0;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub backend: Arc<dyn Backend>,
    pub live: LiveHandle,
    pub tutorial: Arc<Mutex<Tutorial<FileStore>>>,
    pub demo: Arc<DemoGate>,
    pub advisor: Arc<Advisor>,
    pub publisher: PushPublisher,
    pub chart_lookback_hours: i64,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/session", put(set_session))
        .route("/api/v1/counters", get(get_counters))
        .route("/api/v1/counters/:kind/view", post(view_counter))
        .route("/api/v1/counters/:kind/refresh", post(refresh_counter))
        .route("/api/v1/sensors/:id/chart", get(get_chart))
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/tutorial", get(get_tutorial))
        .route("/api/v1/tutorial/:action", post(tutorial_action))
        .route("/api/v1/demo/entry", get(get_demo_entry))
        .route("/api/v1/advisor/chat", post(advisor_chat))
        .route("/api/v1/requests/farms", post(request_farm))
        .route("/api/v1/requests/sensors", post(request_sensor))
        .route("/api/v1/requests/pending", get(list_pending))
        .route("/api/v1/requests/review", post(review_request))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct SessionBody {
    user_id: Option<UserId>,
}

async fn set_session(State(state): State<AppState>, Json(body): Json<SessionBody>) -> Result<StatusCode, AppError> {
    state.live.set_user(body.user_id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn get_counters(State(state): State<AppState>) -> Json<CounterSnapshot> {
    Json(state.live.snapshot())
}

async fn view_counter(State(state): State<AppState>, Path(kind): Path<String>) -> Result<StatusCode, AppError> {
    state.live.view(parse_counter(&kind)?).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn refresh_counter(State(state): State<AppState>, Path(kind): Path<String>) -> Result<StatusCode, AppError> {
    state.live.refresh(parse_counter(&kind)?).await?;
    Ok(StatusCode::ACCEPTED)
}

fn parse_counter(kind: &str) -> Result<CounterKind, Error> {
    kind.parse().map_err(Error::Validation)
}

#[derive(Debug, Deserialize)]
pub struct ChartQuery {
    width: Option<f64>,
    height: Option<f64>,
    kind: Option<SensorKind>,
}

async fn get_chart(
    State(state): State<AppState>,
    Path(sensor): Path<SensorId>,
    Query(params): Query<ChartQuery>,
) -> Result<Json<ChartGeometry>, AppError> {
    let kind = match params.kind {
        Some(kind) => kind,
        None => {
            let row = db::sensor_by_id(&state.pool, sensor)
                .await?
                .ok_or_else(|| Error::NotFound(format!("sensor {}", sensor)))?;
            row.kind.parse::<SensorKind>().map_err(Error::Validation)?
        }
    };

    let window = TimeWindow::ending_at(Utc::now(), state.chart_lookback_hours);
    let readings = match state.backend.sensor_readings_since(sensor, window.start).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!("Chart query for {} failed, showing placeholder: {}", sensor, e);
            Vec::new()
        }
    };

    let width = params.width.unwrap_or(DEFAULT_CHART_WIDTH);
    let height = params.height.unwrap_or(DEFAULT_CHART_HEIGHT);
    let geometry = chart::shape_or_synthetic(&readings, kind, window, width, height, &mut rand::thread_rng());
    Ok(Json(geometry))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    kind: SensorKind,
    value: f64,
}

async fn get_status(Query(params): Query<StatusQuery>) -> Result<Json<Status>, AppError> {
    Ok(Json(classify_reading(params.kind, params.value)?))
}

fn classify_reading(kind: SensorKind, value: f64) -> Result<Status, Error> {
    if !value.is_finite() {
        return Err(Error::Validation(format!("{} is not a valid {} reading", value, kind)));
    }
    Ok(status::classify(kind, value))
}

#[derive(Debug, Serialize)]
pub struct TutorialView {
    #[serde(flatten)]
    state: TutorialState,
    step: Option<TutorialStep>,
    total_steps: usize,
    show_overlay: bool,
}

fn tutorial_view(tutorial: &Tutorial<FileStore>) -> TutorialView {
    TutorialView {
        state: tutorial.state().clone(),
        step: tutorial.current().copied(),
        total_steps: tutorial.steps().len(),
        show_overlay: tutorial.should_show_overlay(),
    }
}

async fn get_tutorial(State(state): State<AppState>) -> Json<TutorialView> {
    let tutorial = state.tutorial.lock().await;
    Json(tutorial_view(&tutorial))
}

async fn tutorial_action(
    State(state): State<AppState>,
    Path(action): Path<String>,
) -> Result<Json<TutorialView>, AppError> {
    let mut tutorial = state.tutorial.lock().await;
    match action.as_str() {
        "start" => tutorial.start(),
        "next" => tutorial.next(),
        "previous" => tutorial.previous(),
        "minimize" => tutorial.minimize(),
        "maximize" => tutorial.maximize(),
        "finish" => tutorial.finish(),
        "close" => tutorial.close(),
        "reset" => tutorial.reset(),
        other => return Err(Error::Validation(format!("unknown tutorial action: {}", other)).into()),
    }
    Ok(Json(tutorial_view(&tutorial)))
}

#[derive(Debug, Deserialize)]
pub struct DemoQuery {
    user_id: UserId,
}

#[derive(Debug, Serialize)]
pub struct DemoResponse {
    entry: DemoEntry,
}

async fn get_demo_entry(State(state): State<AppState>, Query(params): Query<DemoQuery>) -> Json<DemoResponse> {
    let first_time = state.tutorial.lock().await.state().is_first_time_user;
    let entry = state.demo.entry(state.backend.as_ref(), params.user_id, first_time).await;
    Json(DemoResponse { entry })
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    farm_id: Option<FarmId>,
    message: String,
    #[serde(default)]
    history: Vec<ChatMessage>,
    weather: Option<Weather>,
}

async fn advisor_chat(State(state): State<AppState>, Json(body): Json<ChatBody>) -> Result<Json<AdvisorReply>, AppError> {
    if body.message.trim().is_empty() {
        return Err(Error::Validation("message must not be empty".to_string()).into());
    }

    let context = match body.farm_id {
        Some(farm) => match FarmContext::load(&state.pool, farm, body.weather).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!("Failed to load context for farm {}: {}", farm, e);
                None
            }
        },
        None => None,
    };

    let reply = state.advisor.chat(context.as_ref(), &body.history, &body.message).await;
    Ok(Json(reply))
}

#[derive(Debug, Deserialize)]
pub struct FarmRequestBody {
    user_id: UserId,
    name: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    notes: String,
}

async fn request_farm(State(state): State<AppState>, Json(body): Json<FarmRequestBody>) -> Result<(StatusCode, Json<Farm>), AppError> {
    let farm = requests::request_farm(
        &state.pool,
        &state.publisher,
        body.user_id,
        &body.name,
        &body.location,
        &body.notes,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(farm)))
}

#[derive(Debug, Deserialize)]
pub struct SensorRequestBody {
    user_id: UserId,
    farm_id: FarmId,
    name: String,
    kind: SensorKind,
}

async fn request_sensor(
    State(state): State<AppState>,
    Json(body): Json<SensorRequestBody>,
) -> Result<(StatusCode, Json<Sensor>), AppError> {
    let sensor = requests::request_sensor(
        &state.pool,
        &state.publisher,
        body.user_id,
        body.farm_id,
        &body.name,
        body.kind,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(sensor)))
}

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    admin_id: UserId,
}

async fn list_pending(State(state): State<AppState>, Query(params): Query<PendingQuery>) -> Result<Json<PendingRequests>, AppError> {
    Ok(Json(requests::list_pending(&state.pool, params.admin_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ReviewBody {
    admin_id: UserId,
    target: ReviewTarget,
    approve: bool,
}

#[derive(Debug, Serialize)]
pub struct ReviewResponse {
    status: RequestStatus,
}

async fn review_request(State(state): State<AppState>, Json(body): Json<ReviewBody>) -> Result<Json<ReviewResponse>, AppError> {
    let status = requests::review(&state.pool, &state.publisher, body.admin_id, body.target, body.approve).await?;
    Ok(Json(ReviewResponse { status }))
}

struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<Error>() {
            Some(Error::Validation(_)) => StatusCode::BAD_REQUEST,
            Some(Error::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(Error::Forbidden(_)) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("API error: {}", self.0);
            (status, format!("Internal server error: {}", self.0)).into_response()
        } else {
            warn!("Rejected request: {}", self.0);
            (status, self.0.to_string()).into_response()
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
