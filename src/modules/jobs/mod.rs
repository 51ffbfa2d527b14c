use axum::Router;
use axum::routing::{get, post};
use crate::state::AppState;

pub mod dto;
pub mod events;
pub mod handler;
pub mod model;
pub mod repository;
pub mod service;
pub mod ws;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(handler::create_job))
        .route("/{id}", get(handler::get_job))
        .route("/{id}/start", post(handler::start_job))
        .route("/{id}/result", get(handler::stream_result))
        .route("/{id}/ws", get(ws::job_socket))
}
