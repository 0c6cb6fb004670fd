//! REST surface over the project repository.

use crate::error::{ErrorKind, StoreError};
use crate::health::{self, HealthChecker};
use crate::model::Project;
use crate::repository::ProjectRepository;
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{StreamExt, TryStreamExt, future, stream};
use serde::Serialize;
use std::sync::Arc;

pub const API_BASE_PATH: &str = "/api/projects";

#[derive(Clone)]
pub struct AppState {
    repository: ProjectRepository,
}

impl AppState {
    pub fn new(repository: ProjectRepository) -> Self {
        Self { repository }
    }
}

/// Routes for the projects API plus the health probes.
pub fn build_router(repository: ProjectRepository, health: Arc<HealthChecker>) -> Router {
    let api = Router::new()
        .route(
            API_BASE_PATH,
            get(list_projects).post(create_project).put(update_project),
        )
        .route(
            "/api/projects/{id}",
            get(get_project).delete(delete_project),
        )
        .with_state(AppState::new(repository));

    let probes = Router::new()
        .route("/health", get(health::liveness_handler))
        .route("/ready", get(health::readiness_handler))
        .with_state(health);

    api.merge(probes)
}

async fn create_project(
    State(state): State<AppState>,
    body: Result<Json<Project>, JsonRejection>,
) -> Result<Json<Project>, ApiError> {
    let Json(project) = body?;
    if project.id.is_some() {
        return Err(ApiError::bad_request(
            "a new project must not carry an id; use PUT to update",
        ));
    }
    Ok(Json(state.repository.save(project).await?))
}

async fn update_project(
    State(state): State<AppState>,
    body: Result<Json<Project>, JsonRejection>,
) -> Result<Json<Project>, ApiError> {
    let Json(project) = body?;
    if project.id.is_none() {
        return Err(ApiError::bad_request("an update must carry the project id"));
    }
    Ok(Json(state.repository.update(project).await?))
}

/// Streams a JSON array of batches, one element per store page.
///
/// A failure on the first page is an ordinary error response. Once the first
/// batch is sent the status is committed, so a later failure aborts the body
/// and batches already written stay with the client.
async fn list_projects(State(state): State<AppState>) -> Result<Response, ApiError> {
    let mut batches = state.repository.find_all();
    let Some(first) = batches.try_next().await? else {
        return Ok(Json(Vec::<Vec<Project>>::new()).into_response());
    };

    let head = stream::once(future::ready(encode_batch(b"[", &first)));
    let rest = batches.map(|batch| batch.and_then(|batch| encode_batch(b",", &batch)));
    let tail = stream::once(future::ready(Ok::<_, StoreError>(Bytes::from_static(b"]"))));
    let body = Body::from_stream(head.chain(rest).chain(tail));

    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

fn encode_batch(separator: &'static [u8], batch: &[Project]) -> Result<Bytes, StoreError> {
    let mut buf = separator.to_vec();
    serde_json::to_writer(&mut buf, batch)?;
    Ok(Bytes::from(buf))
}

async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Project>, ApiError> {
    Ok(Json(state.repository.find_by_id(&id).await?))
}

async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.repository.delete_by_id(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// Error response for the REST surface.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    category: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            category: "client_error",
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Transient
            | ErrorKind::Rejected
            | ErrorKind::Unauthorized
            | ErrorKind::InvalidDocument => StatusCode::BAD_GATEWAY,
            ErrorKind::ConnectionClosed => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Provisioning | ErrorKind::Config => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, kind = %kind, "request failed");
        }
        Self {
            status,
            category: kind.category(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            category: "client_error",
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.category,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}
