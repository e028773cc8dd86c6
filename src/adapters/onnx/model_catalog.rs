use async_trait::async_trait;
use std::path::Path;

use crate::application::ports::ModelCatalogPort;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::model::ModelId;

/// Checks a model reference before anything tries to load it.
pub struct OnnxModelCatalog;

impl OnnxModelCatalog {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OnnxModelCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelCatalogPort for OnnxModelCatalog {
    async fn validate_model(&self, model: &ModelId) -> DomainResult<()> {
        if model.onnx_path.trim().is_empty() {
            return Err(DomainError::InvalidInput("onnx_path empty".into()));
        }
        let path = Path::new(&model.onnx_path);
        if !path.is_file() {
            return Err(DomainError::NotFound(format!("model file not found: {}", model.onnx_path)));
        }
        if path.extension().and_then(|e| e.to_str()) != Some("onnx") {
            return Err(DomainError::InvalidInput(format!(
                "expected an .onnx file: {}",
                model.onnx_path
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(path: &str) -> ModelId {
        ModelId { name: "yolo".into(), onnx_path: path.into() }
    }

    #[tokio::test]
    async fn rejects_empty_and_missing_paths() {
        let catalog = OnnxModelCatalog::new();
        assert!(matches!(
            catalog.validate_model(&model("  ")).await,
            Err(DomainError::InvalidInput(_))
        ));
        assert!(matches!(
            catalog.validate_model(&model("/nonexistent/yolov8n.onnx")).await,
            Err(DomainError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn accepts_existing_onnx_file() {
        let dir = tempfile::tempdir().unwrap();
        let onnx = dir.path().join("yolov8n.onnx");
        std::fs::write(&onnx, b"not really a model").unwrap();
        let other = dir.path().join("weights.pt");
        std::fs::write(&other, b"x").unwrap();

        let catalog = OnnxModelCatalog::new();
        assert!(catalog.validate_model(&model(onnx.to_str().unwrap())).await.is_ok());
        assert!(matches!(
            catalog.validate_model(&model(other.to_str().unwrap())).await,
            Err(DomainError::InvalidInput(_))
        ));
    }
}
