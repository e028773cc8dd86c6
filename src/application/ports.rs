use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::domain::{
    detection::Detection,
    errors::{DetectorError, DomainResult, PipelineResult},
    model::ModelId,
    stream::{Frame, OutputArtifact, StreamInfo},
};

/// The opaque detection model. Given one frame, returns what it found.
pub trait DetectorPort: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError>;
}

/// Sequential frame reader. `Ok(None)` is end of stream.
pub trait FrameSource: Send {
    fn info(&self) -> &StreamInfo;
    fn next_frame(&mut self) -> PipelineResult<Option<Frame>>;
}

/// Append-only frame writer. Dropping an unfinished sink must release it.
pub trait FrameSink: Send {
    fn write(&mut self, frame: &Frame) -> PipelineResult<()>;
    fn finish(self: Box<Self>) -> PipelineResult<Option<OutputArtifact>>;
}

/// Opens a fresh source for one run.
pub trait SourceProvider: Send + Sync {
    fn describe(&self) -> String;
    fn open(&self) -> PipelineResult<Box<dyn FrameSource>>;
}

/// Creates the output of one run from the opened source's stream info.
pub trait SinkProvider: Send + Sync {
    fn create(&self, info: &StreamInfo) -> PipelineResult<Box<dyn FrameSink>>;
}

#[async_trait]
pub trait ModelCatalogPort: Send + Sync {
    async fn validate_model(&self, model: &ModelId) -> DomainResult<()>;
}

/// A detector owned by the caller and shared between runs. Each `detect`
/// call holds the lock only for that frame.
pub struct SharedDetector {
    inner: Arc<Mutex<Box<dyn DetectorPort>>>,
}

impl SharedDetector {
    pub fn new(detector: Box<dyn DetectorPort>) -> Self {
        Self { inner: Arc::new(Mutex::new(detector)) }
    }
}

impl Clone for SharedDetector {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl DetectorPort for SharedDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| DetectorError::Unavailable("detector lock poisoned".into()))?;
        guard.detect(frame)
    }
}
