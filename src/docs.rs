use utoipa::OpenApi;

use crate::common::error::ErrorKind;
use crate::modules::jobs::dto::{CreateJobRequest, CreateJobResponse, JobResponse};
use crate::modules::jobs::model::{JobFailure, JobStatus};
use crate::pipeline::Operation;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::jobs::handler::create_job,
        crate::modules::jobs::handler::get_job,
        crate::modules::jobs::handler::start_job,
        crate::modules::jobs::handler::stream_result,
        crate::modules::jobs::ws::job_socket,
    ),
    components(
        schemas(
            CreateJobRequest, CreateJobResponse, JobResponse,
            JobStatus, JobFailure, ErrorKind, Operation,
        )
    ),
    tags(
        (name = "Jobs", description = "Chunked transcode jobs")
    )
)]
pub struct ApiDoc;
