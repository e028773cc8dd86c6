use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::Rgb;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use yolo_detect_pipeline::adapters::http::{router, state::HttpState};
use yolo_detect_pipeline::adapters::media::still::encode_png;
use yolo_detect_pipeline::application::annotator::Annotator;
use yolo_detect_pipeline::application::ports::{DetectorPort, SharedDetector};
use yolo_detect_pipeline::application::services::DetectionService;
use yolo_detect_pipeline::config::AppConfig;
use yolo_detect_pipeline::domain::detection::Detection;
use yolo_detect_pipeline::domain::errors::DetectorError;
use yolo_detect_pipeline::domain::progress::ProgressState;
use yolo_detect_pipeline::domain::stream::Frame;
use yolo_detect_pipeline::domain::tally::DetectionTally;

/// Finds one cat in every frame.
struct CatDetector;

impl DetectorPort for CatDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        Ok(vec![Detection::new((10.0, 10.0, 50.0, 50.0), 0.93, "cat").with_class_id(15)])
    }
}

fn state(work_dir: &std::path::Path) -> HttpState {
    let mut config = AppConfig::default();
    config.server.work_dir = work_dir.to_path_buf();
    let service = DetectionService::new(SharedDetector::new(Box::new(CatDetector)), Annotator::default(), config);
    HttpState::new(Arc::new(service))
}

fn app(work_dir: &std::path::Path) -> Router {
    router(state(work_dir))
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder().method("POST").uri(uri).body(Body::from(body)).unwrap()
}

#[tokio::test]
async fn config_is_served() {
    let dir = tempfile::tempdir().unwrap();
    let (status, json) = send(&app(dir.path()), get("/api/config")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["server"]["port"], 8090);
    assert_eq!(json["model"]["params"]["iou_threshold"].as_f64().map(|v| (v * 100.0).round()), Some(45.0));
}

#[tokio::test]
async fn image_detection_returns_tally_and_png() {
    let dir = tempfile::tempdir().unwrap();
    let png = encode_png(&Frame::from_pixel(100, 80, Rgb([0, 0, 0]))).unwrap();

    let (status, json) = send(&app(dir.path()), post("/api/detect/image", png)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["width"], 100);
    assert_eq!(json["height"], 80);
    assert_eq!(json["total"], 1);
    assert_eq!(json["tally"]["cat"], 1);

    let bytes = STANDARD.decode(json["image_png_base64"].as_str().unwrap()).unwrap();
    let img = image::load_from_memory(&bytes).unwrap().to_rgb8();
    assert_eq!(img.dimensions(), (100, 80));
    assert_eq!(img.get_pixel(10, 10).0, [0, 255, 0]);
}

#[tokio::test]
async fn bad_image_uploads_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path());

    let (status, json) = send(&app, post("/api/detect/image", Vec::new())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().is_some());

    let (status, _) = send(&app, post("/api/detect/image", b"plain text".to_vec())).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unknown_jobs_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path());
    let id = uuid::Uuid::new_v4();

    let (status, _) = send(&app, get(&format!("/api/jobs/{}", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, get(&format!("/api/jobs/{}/download", id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, get("/api/jobs/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn finished_video_is_streamed_as_attachment() {
    let dir = tempfile::tempdir().unwrap();
    let state = state(dir.path());
    let app = router(state.clone());

    let output = dir.path().join("done.mp4");
    let video: Vec<u8> = (0..=255u8).cycle().take(200_000).collect();
    std::fs::write(&output, &video).unwrap();
    let id = state.jobs.create();
    state.jobs.complete(id, output, DetectionTally::new(), ProgressState::default());
    let uri = format!("/api/jobs/{}/download", id);

    let res = app.clone().oneshot(get(&uri)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "video/mp4");
    assert_eq!(res.headers()["content-disposition"], "attachment; filename=\"processed_video.mp4\"");
    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.len(), video.len());
    assert!(body == video);

    let ranged = Request::builder().uri(&uri).header("range", "bytes=0-9").body(Body::empty()).unwrap();
    let res = app.oneshot(ranged).await.unwrap();
    assert_eq!(res.status(), StatusCode::PARTIAL_CONTENT);
    let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], &video[..10]);
}

#[tokio::test]
async fn unreadable_video_job_fails_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path());

    let (status, json) = send(&app, post("/api/detect/video?ext=avi", b"not a video".to_vec())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = json["job_id"].as_str().unwrap().to_string();

    let mut state = String::new();
    for _ in 0..300 {
        let (_, job) = send(&app, get(&format!("/api/jobs/{}", job_id))).await;
        state = job["state"].as_str().unwrap_or_default().to_string();
        if state != "running" {
            assert!(job["error"].as_str().is_some());
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state, "failed");

    let (status, _) = send(&app, get(&format!("/api/jobs/{}/download", job_id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // the upload is removed once the job has ended
    let uploads = dir.path().join("uploads");
    let mut leftover = 1;
    for _ in 0..100 {
        leftover = std::fs::read_dir(&uploads).map(|d| d.count()).unwrap_or(0);
        if leftover == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(leftover, 0);
}

#[tokio::test]
async fn empty_video_upload_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (status, _) = send(&app(dir.path()), post("/api/detect/video", Vec::new())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
