pub mod decode;
pub mod model_catalog;
#[cfg(feature = "onnx")]
pub mod yolo_engine;

use crate::application::ports::DetectorPort;
use crate::domain::errors::DetectorError;
use crate::domain::model::InferenceConfig;

/// Loads the configured YOLO model into a detector.
#[cfg(feature = "onnx")]
pub fn load_detector(cfg: &InferenceConfig) -> Result<Box<dyn DetectorPort>, DetectorError> {
    let engine = yolo_engine::OnnxYoloEngine::load(cfg)
        .map_err(|e| DetectorError::ModelLoad(format!("{:#}", e)))?;
    Ok(Box::new(engine))
}

#[cfg(not(feature = "onnx"))]
pub fn load_detector(_cfg: &InferenceConfig) -> Result<Box<dyn DetectorPort>, DetectorError> {
    Err(DetectorError::Unavailable("built without the `onnx` feature".into()))
}
