use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    adapters::media::{
        broadcast::BroadcastOutput,
        ffmpeg::{CameraInput, VideoFileInput, VideoFileOutput},
        still::{ImageBytesInput, ImageFileInput, ImageOutput},
    },
    adapters::onnx::load_detector,
    application::{
        annotator::Annotator,
        jobs::JobRegistry,
        pipeline::{PipelineDriver, PipelineReport},
        ports::{ModelCatalogPort, SharedDetector, SinkProvider, SourceProvider},
    },
    config::{AppConfig, CameraBackend},
    domain::{
        detection::Detection,
        errors::{DomainError, DomainResult, PipelineError},
        progress::ProgressState,
        stream::{Frame, FrameMeta, LiveEvent},
        tally::DetectionTally,
    },
};

/// Capacidad del canal de eventos de una sesión en vivo. Los clientes lentos saltan frames.
const LIVE_CHANNEL_CAPACITY: usize = 16;

/// Resultado de anotar una imagen en memoria.
#[derive(Debug, Clone)]
pub struct ImageDetection {
    pub image: Frame,
    pub tally: DetectionTally,
}

/// Orquestador del pipeline de detección para imagen, vídeo y cámara.
///
/// Mantiene el detector cargado y lo comparte entre ejecuciones; cada
/// ejecución corre en un hilo bloqueante con su propio conteo y progreso.
#[derive(Clone)]
pub struct DetectionService {
    detector: SharedDetector,
    annotator: Arc<Annotator>,
    config: Arc<AppConfig>,
}

impl DetectionService {
    pub fn new(detector: SharedDetector, annotator: Annotator, config: AppConfig) -> Self {
        Self { detector, annotator: Arc::new(annotator), config: Arc::new(config) }
    }

    /// Valida el modelo configurado y lo carga una sola vez.
    pub async fn load(config: AppConfig, catalog: Arc<dyn ModelCatalogPort>) -> DomainResult<Self> {
        let infer = config.inference();
        catalog.validate_model(&infer.model).await?;

        let detector = tokio::task::spawn_blocking(move || load_detector(&infer))
            .await
            .map_err(|e| DomainError::OperationFailed(format!("model loader panicked: {}", e)))?
            .map_err(PipelineError::from)?;

        let annotator = config.annotator();
        Ok(Self::new(SharedDetector::new(detector), annotator, config))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Ejecuta un pipeline completo en un hilo bloqueante.
    pub async fn run<F>(
        &self,
        source: Box<dyn SourceProvider>,
        sink: Box<dyn SinkProvider>,
        stop: Option<watch::Receiver<bool>>,
        on_progress: F,
    ) -> DomainResult<PipelineReport>
    where
        F: FnMut(&ProgressState, &[Detection]) + Send + 'static,
    {
        let annotator = self.annotator.clone();
        let mut detector = self.detector.clone();

        let report = tokio::task::spawn_blocking(move || {
            let mut driver = PipelineDriver::new(&annotator);
            if let Some(stop) = stop {
                driver = driver.with_stop(stop);
            }
            driver.run(source.as_ref(), &mut detector, sink.as_ref(), on_progress)
        })
        .await
        .map_err(|e| DomainError::OperationFailed(format!("pipeline task failed: {}", e)))??;

        Ok(report)
    }

    pub async fn detect_image_bytes(&self, bytes: Vec<u8>) -> DomainResult<ImageDetection> {
        if bytes.is_empty() {
            return Err(DomainError::InvalidInput("empty image upload".into()));
        }
        let report = self
            .run(
                Box::new(ImageBytesInput::new(bytes)),
                Box::new(ImageOutput::in_memory()),
                None,
                |_, _| {},
            )
            .await?;
        into_image_detection(report)
    }

    /// Anota un fichero de imagen y guarda el resultado en `output`.
    pub async fn detect_image_file(&self, input: &Path, output: &Path) -> DomainResult<ImageDetection> {
        let report = self
            .run(
                Box::new(ImageFileInput::new(input)),
                Box::new(ImageOutput::file(output)),
                None,
                |_, _| {},
            )
            .await?;
        into_image_detection(report)
    }

    /// Anota un vídeo completo en `output`. Aquí un vídeo sin frames es un
    /// error.
    pub async fn detect_video<F>(&self, input: &Path, output: &Path, on_progress: F) -> DomainResult<PipelineReport>
    where
        F: FnMut(&ProgressState, &[Detection]) + Send + 'static,
    {
        let report = self
            .run(
                Box::new(VideoFileInput::new(input)),
                Box::new(VideoFileOutput::new(output, self.config.video.codec.clone())),
                None,
                on_progress,
            )
            .await?;
        Ok(report.require_frames()?)
    }

    /// Procesa en segundo plano un vídeo subido y devuelve el id del trabajo
    /// de inmediato. La subida se borra al terminar el trabajo.
    pub fn start_video_job(&self, jobs: &JobRegistry, upload: PathBuf, output_dir: &Path) -> Uuid {
        let id = jobs.create();
        let output = fresh_output_path(output_dir, "mp4");
        let service = self.clone();
        let jobs = jobs.clone();

        tokio::spawn(async move {
            let progress_jobs = jobs.clone();
            let result = service
                .detect_video(&upload, &output, move |p, dets| progress_jobs.record_frame(id, p, dets))
                .await;

            settle_video_job(&jobs, id, output, result).await;
            if let Err(e) = tokio::fs::remove_file(&upload).await {
                warn!("Could not remove upload {}: {}", upload.display(), e);
            }
        });
        id
    }

    /// La cámara configurada como fuente en vivo.
    pub fn camera_input(&self) -> DomainResult<Box<dyn SourceProvider>> {
        let settings = self.config.camera_settings();
        match self.config.camera.backend {
            CameraBackend::Ffmpeg => Ok(Box::new(CameraInput { settings })),
            #[cfg(feature = "v4l2")]
            CameraBackend::V4l2 => {
                Ok(Box::new(crate::adapters::v4l2::capture::V4l2CameraInput { settings }))
            }
            #[cfg(not(feature = "v4l2"))]
            CameraBackend::V4l2 => Err(DomainError::InvalidInput(
                "camera backend v4l2 needs the `v4l2` feature".into(),
            )),
        }
    }

    /// Publica frames anotados de la cámara y sus metadatos hasta que se
    /// activa `stop`. Termina con [`LiveEvent::Finished`].
    pub fn start_live(&self, stop: watch::Receiver<bool>) -> broadcast::Receiver<LiveEvent> {
        let (tx, rx) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        self.spawn_live(self.camera_input(), tx, stop);
        rx
    }

    fn spawn_live(
        &self,
        source: DomainResult<Box<dyn SourceProvider>>,
        tx: broadcast::Sender<LiveEvent>,
        stop: watch::Receiver<bool>,
    ) {
        let service = self.clone();
        let (width, height) = (self.config.camera.width, self.config.camera.height);
        let sink = BroadcastOutput { tx: tx.clone(), quality: self.config.camera.jpeg_quality };

        tokio::spawn(async move {
            let meta_tx = tx.clone();
            let mut tally = DetectionTally::new();
            let mut last = Instant::now();
            let on_progress = move |p: &ProgressState, dets: &[Detection]| {
                let frame_ms = last.elapsed().as_secs_f32() * 1000.0;
                last = Instant::now();
                tally.update(dets);
                let _ = meta_tx.send(LiveEvent::Meta(FrameMeta {
                    frame_index: p.frames_processed,
                    width,
                    height,
                    frame_ms,
                    fps_est: if frame_ms > 0.0 { 1000.0 / frame_ms } else { 0.0 },
                    detections: dets.to_vec(),
                    tally: tally.clone(),
                }));
            };

            let result = match source {
                Ok(source) => service.run(source, Box::new(sink), Some(stop), on_progress).await,
                Err(e) => Err(e),
            };
            let event = match result {
                Ok(report) => {
                    info!("Live session ended: {}", report.tally.summary());
                    LiveEvent::Finished { frames: report.frames_processed(), error: None }
                }
                Err(e) => {
                    error!("Live session failed: {}", e);
                    LiveEvent::Finished { frames: 0, error: Some(e.to_string()) }
                }
            };
            let _ = tx.send(event);
        });
    }

    /// Graba la cámara configurada en `output` hasta que se activa `stop`.
    pub async fn record_camera<F>(
        &self,
        output: &Path,
        stop: watch::Receiver<bool>,
        on_progress: F,
    ) -> DomainResult<PipelineReport>
    where
        F: FnMut(&ProgressState, &[Detection]) + Send + 'static,
    {
        let sink = VideoFileOutput::new(output, self.config.video.codec.clone());
        self.run(self.camera_input()?, Box::new(sink), Some(stop), on_progress).await
    }
}

/// Registra cómo terminó un trabajo de vídeo. La salida de un trabajo
/// fallido está incompleta o vacía, así que se borra.
async fn settle_video_job(jobs: &JobRegistry, id: Uuid, output: PathBuf, result: DomainResult<PipelineReport>) {
    match result {
        Ok(report) => {
            info!("Job {}: {} frames, {}", id, report.frames_processed(), report.tally.summary());
            jobs.complete(id, output, report.tally, report.progress);
        }
        Err(e) => {
            error!("Job {} failed: {}", id, e);
            match tokio::fs::remove_file(&output).await {
                Ok(()) => info!("Job {}: removed {}", id, output.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Job {}: could not remove {}: {}", id, output.display(), e),
            }
            jobs.fail(id, e.to_string());
        }
    }
}

fn into_image_detection(report: PipelineReport) -> DomainResult<ImageDetection> {
    let image = report
        .artifact
        .and_then(|a| a.into_image())
        .ok_or_else(|| DomainError::OperationFailed("image produced no output".into()))?;
    Ok(ImageDetection { image, tally: report.tally })
}

/// Nombre de fichero único bajo `dir`; ejecuciones concurrentes nunca comparten salida.
pub fn fresh_output_path(dir: &Path, ext: &str) -> PathBuf {
    dir.join(format!("{}.{}", Uuid::new_v4(), ext))
}
