use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::http::state::HttpState;
use crate::adapters::media::still::encode_png;
use crate::application::dto::{ErrorResponse, ImageDetectionResponse, JobCreatedResponse};
use crate::domain::errors::{DomainError, PipelineError};

/// Ofrece el vídeo procesado como descarga.
const DOWNLOAD_DISPOSITION: &str = "attachment; filename=\"processed_video.mp4\"";

fn error_response(e: &DomainError) -> Response {
    let status = match e {
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        DomainError::Pipeline(PipelineError::SourceOpen(_) | PipelineError::EmptyRun) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse { error: e.to_string() })).into_response()
}

pub async fn get_config(State(st): State<HttpState>) -> impl IntoResponse {
    Json(st.detection.config().clone())
}

pub async fn detect_image(State(st): State<HttpState>, body: Bytes) -> Response {
    let result = match st.detection.detect_image_bytes(body.to_vec()).await {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    let png = match encode_png(&result.image) {
        Ok(png) => png,
        Err(e) => return error_response(&e.into()),
    };
    Json(ImageDetectionResponse {
        width: result.image.width(),
        height: result.image.height(),
        total: result.tally.total(),
        tally: result.tally,
        image_png_base64: STANDARD.encode(png),
    })
    .into_response()
}

#[derive(Deserialize)]
pub struct UploadQuery {
    ext: Option<String>,
}

/// Solo acepta extensiones alfanuméricas cortas; lo demás pasa a mp4.
fn upload_extension(ext: Option<&str>) -> String {
    match ext.map(|e| e.trim_start_matches('.').to_ascii_lowercase()) {
        Some(e) if !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()) => e,
        _ => "mp4".into(),
    }
}

pub async fn detect_video(
    State(st): State<HttpState>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> Response {
    if body.is_empty() {
        return error_response(&DomainError::InvalidInput("empty video upload".into()));
    }
    let server = &st.detection.config().server;
    let upload_dir = server.work_dir.join("uploads");
    let output_dir = server.work_dir.join("processed");
    for dir in [&upload_dir, &output_dir] {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            return error_response(&DomainError::OperationFailed(format!("{}: {}", dir.display(), e)));
        }
    }

    let ext = upload_extension(query.ext.as_deref());
    let upload = upload_dir.join(format!("{}.{}", Uuid::new_v4(), ext));
    if let Err(e) = tokio::fs::write(&upload, &body).await {
        return error_response(&DomainError::OperationFailed(format!("storing upload: {}", e)));
    }

    let job_id = st.detection.start_video_job(&st.jobs, upload, &output_dir);
    info!("Job {} started for a {} byte upload", job_id, body.len());
    (StatusCode::ACCEPTED, Json(JobCreatedResponse { job_id })).into_response()
}

pub async fn job_status(State(st): State<HttpState>, Path(id): Path<Uuid>) -> Response {
    match st.jobs.status(id) {
        Some(status) => Json(status).into_response(),
        None => error_response(&DomainError::NotFound(format!("job {}", id))),
    }
}

/// Sirve el vídeo procesado desde disco en streaming, con soporte de rangos.
pub async fn job_download(State(st): State<HttpState>, Path(id): Path<Uuid>, req: Request) -> Response {
    let Some(path) = st.jobs.output(id) else {
        return error_response(&DomainError::NotFound(format!("no finished output for job {}", id)));
    };
    if let Err(e) = tokio::fs::metadata(&path).await {
        warn!("Output of job {} unreadable: {}", id, e);
        return error_response(&DomainError::NotFound(format!("output of job {}", id)));
    }

    let served = ServeFile::new(&path).oneshot(req).await;
    match served {
        Ok(res) => {
            let mut res = res.map(Body::new);
            res.headers_mut()
                .insert(header::CONTENT_DISPOSITION, HeaderValue::from_static(DOWNLOAD_DISPOSITION));
            res
        }
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_extension_is_sanitized() {
        assert_eq!(upload_extension(Some("MOV")), "mov");
        assert_eq!(upload_extension(Some(".avi")), "avi");
        assert_eq!(upload_extension(Some("../../etc")), "mp4");
        assert_eq!(upload_extension(Some("")), "mp4");
        assert_eq!(upload_extension(None), "mp4");
    }

    #[test]
    fn errors_map_to_status_codes() {
        let cases = [
            (DomainError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (DomainError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (PipelineError::EmptyRun.into(), StatusCode::UNPROCESSABLE_ENTITY),
            (PipelineError::SinkWrite("x".into()).into(), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(error_response(&err).status(), status);
        }
    }
}
