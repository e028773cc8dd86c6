mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::services::ServeDir;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use yolo_detect_pipeline::{
    adapters::{
        http::{router, state::HttpState},
        onnx::model_catalog::OnnxModelCatalog,
    },
    application::services::{fresh_output_path, DetectionService},
    config::AppConfig,
    domain::tally::DetectionTally,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs con RUST_LOG=info por defecto
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    if let Some(model) = cli.model {
        config.model.onnx_path = model;
    }
    if let Some(conf) = cli.conf {
        config.model.params.conf_threshold = conf;
    }

    if let Command::InitConfig { path } = &cli.command {
        config.save(path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }
    if let Command::Webcam { device: Some(device), .. } = &cli.command {
        config.camera.device = device.clone();
    }
    if let Command::Serve { port: Some(port) } = &cli.command {
        config.server.port = *port;
    }

    tracing::info!("Loading model {}", config.model.onnx_path);
    let service = DetectionService::load(config, Arc::new(OnnxModelCatalog::new()))
        .await
        .context("loading detector")?;

    match cli.command {
        Command::Image { input, output } => run_image(&service, &input, output).await,
        Command::Video { input, output } => run_video(&service, &input, output).await,
        Command::Webcam { output, max_frames, .. } => run_webcam(&service, output, max_frames).await,
        Command::Serve { .. } => serve(service).await,
        Command::InitConfig { .. } => Ok(()),
    }
}

fn print_tally(tally: &DetectionTally) {
    if tally.is_empty() {
        println!("No objects detected.");
        return;
    }
    println!("Detected objects:");
    for (label, count) in tally.sorted() {
        println!("  {}: {}", label, count);
    }
}

fn derived_output(input: &Path, dir: Option<&Path>, ext: &str) -> PathBuf {
    let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "output".into());
    let name = format!("{}_detected.{}", stem, ext);
    match dir {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    }
}

async fn run_image(service: &DetectionService, input: &Path, output: Option<PathBuf>) -> Result<()> {
    let output = output.unwrap_or_else(|| derived_output(input, None, "png"));
    let result = service.detect_image_file(input, &output).await?;
    println!("Saved {}", output.display());
    print_tally(&result.tally);
    Ok(())
}

async fn run_video(service: &DetectionService, input: &Path, output: Option<PathBuf>) -> Result<()> {
    let output = output
        .unwrap_or_else(|| derived_output(input, Some(&service.config().video.output_dir), "mp4"));

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    let bar = pb.clone();
    let report = service
        .detect_video(input, &output, move |progress, detections| {
            if let Some(total) = progress.frames_total {
                bar.set_length(total);
            }
            bar.set_position(progress.frames_processed);
            bar.set_message(format!("{} objects", detections.len()));
        })
        .await;
    pb.finish_and_clear();
    let report = report?;

    println!("Processed {} frames, saved {}", report.frames_processed(), output.display());
    print_tally(&report.tally);
    Ok(())
}

async fn run_webcam(service: &DetectionService, output: Option<PathBuf>, max_frames: Option<u64>) -> Result<()> {
    let output = output.unwrap_or_else(|| fresh_output_path(&service.config().video.output_dir, "mp4"));
    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);

    let ctrl_c_tx = stop_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrl_c_tx.send(true);
        }
    });

    let sp = ProgressBar::new_spinner();
    sp.set_style(ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed}]")?);
    sp.enable_steady_tick(std::time::Duration::from_millis(100));
    println!("Recording {} (Ctrl-C to stop)", service.config().camera.device);

    let bar = sp.clone();
    let report = service
        .record_camera(&output, stop_rx, move |progress, detections| {
            bar.set_message(format!("frame {} - {} objects", progress.frames_processed, detections.len()));
            if max_frames.is_some_and(|max| progress.frames_processed >= max) {
                let _ = stop_tx.send(true);
            }
        })
        .await;
    sp.finish_and_clear();
    let report = report?;

    println!("Recorded {} frames to {}", report.frames_processed(), output.display());
    print_tally(&report.tally);
    Ok(())
}

async fn serve(service: DetectionService) -> Result<()> {
    let server = service.config().server.clone();
    let state = HttpState::new(Arc::new(service));

    let app = router(state).fallback_service(ServeDir::new(&server.static_dir));

    let addr = format!("0.0.0.0:{}", server.port);
    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Static files served from {}", server.static_dir.display());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
