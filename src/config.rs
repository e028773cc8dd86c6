use anyhow::{Context, Result};
use image::Rgb;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::adapters::media::ffmpeg::CameraSettings;
use crate::application::annotator::{AnnotationStyle, Annotator};
use crate::domain::model::{InferenceConfig, ModelId, YoloParams};

pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Whole application configuration. Every section and field is optional in
/// the JSON file and falls back to its default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub annotation: AnnotationConfig,
    pub video: VideoConfig,
    pub camera: CameraConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub onnx_path: String,
    pub params: YoloParams,
    pub class_names: Option<Vec<String>>,
    pub classes: Option<Vec<usize>>,
    pub intra_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            onnx_path: "models/yolov8n.onnx".into(),
            params: YoloParams::default(),
            class_names: None,
            classes: None,
            intra_threads: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    pub color: [u8; 3],
    pub thickness: u32,
    pub text_scale: u32,
    pub font_path: Option<PathBuf>,
    pub font_size_px: f32,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self { color: [0, 255, 0], thickness: 2, text_scale: 1, font_path: None, font_size_px: 16.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub codec: String,
    pub output_dir: PathBuf,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self { codec: "libx264".into(), output_dir: "output".into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    Ffmpeg,
    V4l2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub backend: CameraBackend,
    pub jpeg_quality: u8,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
            fps: 30,
            backend: CameraBackend::Ffmpeg,
            jpeg_quality: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: PathBuf,
    pub work_dir: PathBuf,
    pub max_upload_mb: usize,
    /// Finished video jobs kept for download before the oldest is evicted.
    pub max_finished_jobs: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8090,
            static_dir: "static".into(),
            work_dir: "work".into(),
            max_upload_mb: 512,
            max_finished_jobs: 32,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(cfg)
    }

    /// Loads `path` when given, else `config.json` if it exists, else the
    /// defaults. An explicitly named file must exist.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None if Path::new(DEFAULT_CONFIG_PATH).is_file() => {
                Self::load(Path::new(DEFAULT_CONFIG_PATH))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text + "\n").with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn inference(&self) -> InferenceConfig {
        let name = Path::new(&self.model.onnx_path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "yolo".into());
        InferenceConfig {
            model: ModelId { name, onnx_path: self.model.onnx_path.clone() },
            params: self.model.params.clone(),
            class_names: self.model.class_names.clone(),
            classes: self.model.classes.clone(),
            intra_threads: self.model.intra_threads,
        }
    }

    pub fn annotation_style(&self) -> AnnotationStyle {
        AnnotationStyle {
            color: Rgb(self.annotation.color),
            thickness: self.annotation.thickness.max(1),
            text_scale: self.annotation.text_scale.max(1),
        }
    }

    pub fn annotator(&self) -> Annotator {
        let annotator = Annotator::new(self.annotation_style());
        match &self.annotation.font_path {
            Some(path) => annotator.with_font_file(path, self.annotation.font_size_px),
            None => annotator,
        }
    }

    pub fn camera_settings(&self) -> CameraSettings {
        CameraSettings {
            device: self.camera.device.clone(),
            width: self.camera.width,
            height: self.camera.height,
            fps: self.camera.fps,
        }
    }
}
