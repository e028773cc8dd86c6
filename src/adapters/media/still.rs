use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::application::ports::{FrameSink, FrameSource, SinkProvider, SourceProvider};
use crate::domain::errors::{PipelineError, PipelineResult};
use crate::domain::stream::{Frame, OutputArtifact, StreamInfo};

/// Finite source of exactly one decoded image.
pub struct StillImageSource {
    info: StreamInfo,
    frame: Option<Frame>,
}

impl StillImageSource {
    pub fn from_frame(frame: Frame) -> Self {
        Self { info: StreamInfo::still(frame.width(), frame.height()), frame: Some(frame) }
    }

    pub fn from_bytes(bytes: &[u8]) -> PipelineResult<Self> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| PipelineError::SourceOpen(format!("decoding image: {}", e)))?;
        Ok(Self::from_frame(img.to_rgb8()))
    }

    pub fn from_path(path: &Path) -> PipelineResult<Self> {
        let img = image::open(path)
            .map_err(|e| PipelineError::SourceOpen(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_frame(img.to_rgb8()))
    }
}

impl FrameSource for StillImageSource {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        Ok(self.frame.take())
    }
}

/// Keeps the single annotated frame and optionally saves it on finish. The
/// file format follows the path's extension.
pub struct StillImageSink {
    frame: Option<Frame>,
    save_to: Option<PathBuf>,
}

impl StillImageSink {
    pub fn new(save_to: Option<PathBuf>) -> Self {
        Self { frame: None, save_to }
    }
}

impl FrameSink for StillImageSink {
    fn write(&mut self, frame: &Frame) -> PipelineResult<()> {
        if self.frame.is_some() {
            return Err(PipelineError::SinkWrite("image output takes a single frame".into()));
        }
        self.frame = Some(frame.clone());
        Ok(())
    }

    fn finish(self: Box<Self>) -> PipelineResult<Option<OutputArtifact>> {
        let Some(frame) = self.frame else {
            return Ok(None);
        };
        if let Some(path) = &self.save_to {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .map_err(|e| PipelineError::SinkWrite(format!("{}: {}", parent.display(), e)))?;
            }
            frame
                .save(path)
                .map_err(|e| PipelineError::SinkWrite(format!("{}: {}", path.display(), e)))?;
            info!("Saved annotated image to {}", path.display());
        }
        Ok(Some(OutputArtifact::Image(frame)))
    }
}

/// An image file read fresh for each run.
#[derive(Debug, Clone)]
pub struct ImageFileInput {
    pub path: PathBuf,
}

impl ImageFileInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SourceProvider for ImageFileInput {
    fn describe(&self) -> String {
        format!("image {}", self.path.display())
    }

    fn open(&self) -> PipelineResult<Box<dyn FrameSource>> {
        Ok(Box::new(StillImageSource::from_path(&self.path)?))
    }
}

/// Encoded image bytes held in memory, e.g. an upload.
#[derive(Debug, Clone)]
pub struct ImageBytesInput {
    bytes: Arc<[u8]>,
}

impl ImageBytesInput {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self { bytes: bytes.into() }
    }
}

impl SourceProvider for ImageBytesInput {
    fn describe(&self) -> String {
        format!("uploaded image ({} bytes)", self.bytes.len())
    }

    fn open(&self) -> PipelineResult<Box<dyn FrameSource>> {
        Ok(Box::new(StillImageSource::from_bytes(&self.bytes)?))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImageOutput {
    pub save_to: Option<PathBuf>,
}

impl ImageOutput {
    pub fn in_memory() -> Self {
        Self { save_to: None }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self { save_to: Some(path.into()) }
    }
}

impl SinkProvider for ImageOutput {
    fn create(&self, _info: &StreamInfo) -> PipelineResult<Box<dyn FrameSink>> {
        Ok(Box::new(StillImageSink::new(self.save_to.clone())))
    }
}

/// Encodes a frame as PNG.
pub fn encode_png(frame: &Frame) -> PipelineResult<Vec<u8>> {
    let mut out = std::io::Cursor::new(Vec::new());
    frame
        .write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| PipelineError::SinkWrite(format!("encoding png: {}", e)))?;
    Ok(out.into_inner())
}
