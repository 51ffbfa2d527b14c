use super::dto::{CreateJobRequest, CreateJobResponse, JobResponse};
use super::service::{JobService, JobServiceError};
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::pipeline::filter_graph::content_type_for;
use crate::state::AppState;
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;
use tracing::error;
use uuid::Uuid;

impl From<JobServiceError> for ApiError {
    fn from(e: JobServiceError) -> Self {
        let status = e.status_code();
        if status.is_server_error() {
            error!("Job request failed: {}", e);
        }
        ApiError(e.public_message(), status)
    }
}

/// Create a job and get an upload URL for its source
#[utoipa::path(
    post,
    path = "/api/v1/jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 201, description = "Job created", body = ApiResponse<CreateJobResponse>),
        (status = 400, description = "Invalid transformations"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Jobs"
)]
pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Response {
    match JobService::create(&state, req).await {
        Ok(res) => ApiSuccess(
            ApiResponse::success(res, "Job created successfully"),
            StatusCode::CREATED,
        )
        .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Get Job", body = ApiResponse<JobResponse>),
        (status = 404, description = "Job Not Found"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Jobs"
)]
pub async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match JobService::get(&state, id).await {
        Ok(job) => ApiSuccess(
            ApiResponse::success(JobResponse::from(job), "Job retrieved successfully"),
            StatusCode::OK,
        )
        .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Queue an uploaded job for processing
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/start",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 202, description = "Job queued", body = ApiResponse<JobResponse>),
        (status = 404, description = "Job Not Found"),
        (status = 409, description = "Job already started"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Jobs"
)]
pub async fn start_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match JobService::start(&state, id).await {
        Ok(job) => ApiSuccess(
            ApiResponse::success(JobResponse::from(job), "Job queued for processing"),
            StatusCode::ACCEPTED,
        )
        .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Stream the final artifact of a completed job
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}/result",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Result content"),
        (status = 404, description = "Job Not Found"),
        (status = 409, description = "Job has no result yet"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Jobs"
)]
pub async fn stream_result(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let (key, reader) = match JobService::open_result(&state, id).await {
        Ok(opened) => opened,
        Err(e) => return ApiError::from(e).into_response(),
    };

    let file_name = key.rsplit('/').next().unwrap_or(&key).to_string();
    let body = Body::from_stream(ReaderStream::new(reader));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for(&key))
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        )
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
