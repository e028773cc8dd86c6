use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, RgbImage};
use ndarray::{Array4, ArrayViewD, Axis, Ix2, IxDyn};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::Session;
use ort::value::Value;
use std::fs;
use std::time::Instant;
use tracing::{debug, info};

use super::decode::OutputDecoder;
use crate::application::ports::DetectorPort;
use crate::domain::detection::Detection;
use crate::domain::errors::DetectorError;
use crate::domain::model::InferenceConfig;
use crate::domain::stream::Frame;

/// Detector YOLO que ejecuta un modelo ONNX exportado sobre ONNX Runtime.
pub struct OnnxYoloEngine {
    session: Session,
    decoder: OutputDecoder,
}

impl OnnxYoloEngine {
    pub fn load(cfg: &InferenceConfig) -> Result<Self> {
        let path = &cfg.model.onnx_path;
        let mut builder = Session::builder()?.with_intra_threads(cfg.intra_threads.max(1))?;

        // CUDA es opcional: si no se puede registrar continuamos en CPU.
        let cuda = CUDAExecutionProvider::default().build();
        if let Ok(builder_with_cuda) = builder.clone().with_execution_providers([cuda]) {
            builder = builder_with_cuda;
        }

        let model_bytes = fs::read(path).with_context(|| format!("reading model {}", path))?;
        let session = builder.commit_from_memory(&model_bytes)?;
        info!("Loaded ONNX model {} ({})", cfg.model.name, path);

        Ok(Self { session, decoder: OutputDecoder::from_config(cfg) })
    }

    pub fn infer(&mut self, rgb: &RgbImage) -> Result<Vec<Detection>> {
        let imgsz = self.decoder.params().input_size as usize;
        if imgsz == 0 {
            return Err(anyhow!("input_size must be positive"));
        }
        let started = Instant::now();
        let resized = image::imageops::resize(rgb, imgsz as u32, imgsz as u32, FilterType::Nearest);

        let mut input = Array4::<f32>::zeros((1, 3, imgsz, imgsz));
        for (x, y, pixel) in resized.enumerate_pixels() {
            input[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
            input[[0, 1, y as usize, x as usize]] = pixel[1] as f32 / 255.0;
            input[[0, 2, y as usize, x as usize]] = pixel[2] as f32 / 255.0;
        }

        let input_shape = vec![1, 3, imgsz as i64, imgsz as i64];
        let (data, _) = input.into_raw_vec_and_offset();
        let input_tensor = Value::from_array((input_shape, data))?;

        let outputs = self.session.run(ort::inputs![input_tensor])?;
        let (shape_out, data_out) = outputs[0].try_extract_tensor::<f32>()?;

        let dims: Vec<usize> = shape_out.iter().map(|&x| x as usize).collect();
        if dims.len() != 3 {
            return Err(anyhow!("unexpected output shape {:?}", dims));
        }
        let array_view = ArrayViewD::from_shape(IxDyn(&dims), data_out)?;
        let view = array_view.index_axis(Axis(0), 0).into_dimensionality::<Ix2>()?;

        let sx = rgb.width() as f32 / imgsz as f32;
        let sy = rgb.height() as f32 / imgsz as f32;
        let detections = self.decoder.decode(view, (sx, sy));

        debug!(
            "onnx: {} detections in {:.1} ms",
            detections.len(),
            started.elapsed().as_secs_f32() * 1000.0
        );
        Ok(detections)
    }
}

impl DetectorPort for OnnxYoloEngine {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        self.infer(frame).map_err(|e| DetectorError::Inference(format!("{:#}", e)))
    }
}
