use std::sync::Arc;

use crate::application::{jobs::JobRegistry, services::DetectionService};

/// Estado compartido para los manejadores HTTP de Axum.
#[derive(Clone)]
pub struct HttpState {
    pub detection: Arc<DetectionService>,
    /// Trabajos de vídeo en segundo plano lanzados por subidas.
    pub jobs: JobRegistry,
}

impl HttpState {
    pub fn new(detection: Arc<DetectionService>) -> Self {
        let jobs = JobRegistry::with_capacity(detection.config().server.max_finished_jobs);
        Self { detection, jobs }
    }
}
