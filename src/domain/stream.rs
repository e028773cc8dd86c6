use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::detection::Detection;
use super::tally::DetectionTally;

/// RGB8 pixel buffer. Everything between source decode and sink encode is RGB.
pub type Frame = RgbImage;

/// What an opened source knows about its frames. Sinks are built from it so
/// the output keeps the source resolution and frame rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frames_total: Option<u64>,
}

impl StreamInfo {
    pub fn still(width: u32, height: u32) -> Self {
        Self { width, height, fps: 0.0, frames_total: Some(1) }
    }

    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// What a finished sink produced.
#[derive(Debug, Clone)]
pub enum OutputArtifact {
    Video {
        path: PathBuf,
        frames: u64,
        width: u32,
        height: u32,
        fps: f64,
    },
    Image(Frame),
}

impl OutputArtifact {
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            OutputArtifact::Video { path, .. } => Some(path),
            OutputArtifact::Image(_) => None,
        }
    }

    pub fn into_image(self) -> Option<Frame> {
        match self {
            OutputArtifact::Image(frame) => Some(frame),
            OutputArtifact::Video { .. } => None,
        }
    }
}

/// Per-frame metadata pushed to live viewers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMeta {
    pub frame_index: u64,
    pub width: u32,
    pub height: u32,
    /// Wall time since the previous frame.
    pub frame_ms: f32,
    pub fps_est: f32,
    pub detections: Vec<Detection>,
    pub tally: DetectionTally,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsFrameMetaMessage {
    pub r#type: String,
    pub meta: FrameMeta,
}

/// Messages on a live session's broadcast channel.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// JPEG-encoded annotated frame.
    Frame(Vec<u8>),
    Meta(FrameMeta),
    Finished { frames: u64, error: Option<String> },
}
