use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::dto::JobResponse;
use super::service::JobService;
use crate::common::response::ApiError;
use crate::state::AppState;

/// Websocket that receives `{"msg": ...}` once the job finishes.
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}/ws",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 101, description = "Switching to websocket"),
        (status = 404, description = "Job Not Found")
    ),
    tag = "Jobs"
)]
pub async fn job_socket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(e) = JobService::get(&state, id).await {
        return ApiError::from(e).into_response();
    }
    ws.on_upgrade(move |socket| serve_socket(state, id, socket))
}

async fn serve_socket(state: AppState, job_id: Uuid, mut socket: WebSocket) {
    let (connection_id, mut outbox) = state.hub.register().await;

    match state.jobs.add_connection(job_id, &connection_id).await {
        // Jobs that already finished get their final message right away.
        Ok(job) if job.status.is_finished() => {
            if let Some(msg) = JobResponse::from(job).message {
                let payload = json!({ "msg": msg }).to_string();
                let _ = socket.send(Message::Text(payload.into())).await;
            }
        }
        Ok(_) => info!("Connection {} watching job {}", connection_id, job_id),
        Err(e) => {
            warn!("Failed to register connection on job {}: {}", job_id, e);
            state.hub.unregister(&connection_id).await;
            return;
        }
    }

    loop {
        tokio::select! {
            outgoing = outbox.recv() => match outgoing {
                Some(text) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.hub.unregister(&connection_id).await;
    if let Err(e) = state.jobs.remove_connection(job_id, &connection_id).await {
        warn!("Failed to drop connection {} from job {}: {}", connection_id, job_id, e);
    }
    info!("Connection {} closed", connection_id);
}
