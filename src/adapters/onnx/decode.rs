use ndarray::ArrayView2;
use std::cmp::Ordering;

use crate::domain::detection::Detection;
use crate::domain::model::{InferenceConfig, YoloParams, COCO_CLASSES};

/// Turns a raw YOLO head output into frame-space detections.
///
/// Expects one image's output laid out as `[4 + C, N]`: box center, width and
/// height in model-input pixels followed by C class scores, for N candidates.
#[derive(Debug, Clone)]
pub struct OutputDecoder {
    params: YoloParams,
    labels: Vec<String>,
    classes: Option<Vec<usize>>,
}

impl OutputDecoder {
    pub fn new(params: YoloParams) -> Self {
        Self {
            params,
            labels: COCO_CLASSES.iter().map(|s| s.to_string()).collect(),
            classes: None,
        }
    }

    pub fn from_config(cfg: &InferenceConfig) -> Self {
        let mut decoder = Self::new(cfg.params.clone());
        if let Some(names) = &cfg.class_names {
            decoder.labels = names.clone();
        }
        decoder.classes = cfg.classes.clone();
        decoder
    }

    pub fn params(&self) -> &YoloParams {
        &self.params
    }

    pub fn label(&self, class_id: usize) -> String {
        self.labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class{}", class_id))
    }

    /// `scale` maps model-input pixels to frame pixels on each axis.
    pub fn decode(&self, view: ArrayView2<f32>, scale: (f32, f32)) -> Vec<Detection> {
        // some exports emit [N, 4 + C]
        let features = 4 + self.labels.len();
        let candidate_major = if view.nrows() == features {
            false
        } else {
            view.ncols() == features || view.nrows() > view.ncols()
        };
        let view = if candidate_major { view.reversed_axes() } else { view };
        if view.nrows() < 5 {
            return Vec::new();
        }
        let (sx, sy) = scale;

        let mut candidates = Vec::new();
        for column in view.columns() {
            let Some((class_id, score)) = column
                .iter()
                .skip(4)
                .copied()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(Ordering::Equal))
            else {
                continue;
            };

            if !(score > self.params.conf_threshold) {
                continue;
            }
            if let Some(allowed) = &self.classes {
                if !allowed.contains(&class_id) {
                    continue;
                }
            }

            let (cx, cy, w, h) = (column[0], column[1], column[2], column[3]);
            candidates.push(
                Detection::new(
                    (
                        (cx - w / 2.0) * sx,
                        (cy - h / 2.0) * sy,
                        (cx + w / 2.0) * sx,
                        (cy + h / 2.0) * sy,
                    ),
                    score,
                    self.label(class_id),
                )
                .with_class_id(class_id),
            );
        }

        let mut kept = nms(candidates, self.params.iou_threshold);
        kept.truncate(self.params.max_detections);
        kept
    }
}

/// Class-wise non-maximum suppression. Output is sorted by confidence,
/// highest first.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == det.class_id && k.iou(&det) > iou_threshold);
        if !suppressed {
            kept.push(det);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Builds a `[4 + classes, N]` head output from (cx, cy, w, h, class, score).
    fn head(classes: usize, rows: &[(f32, f32, f32, f32, usize, f32)]) -> Array2<f32> {
        let mut out = Array2::<f32>::zeros((4 + classes, rows.len()));
        for (i, &(cx, cy, w, h, class, score)) in rows.iter().enumerate() {
            out[[0, i]] = cx;
            out[[1, i]] = cy;
            out[[2, i]] = w;
            out[[3, i]] = h;
            out[[4 + class, i]] = score;
        }
        out
    }

    fn params() -> YoloParams {
        YoloParams { input_size: 640, conf_threshold: 0.25, iou_threshold: 0.45, max_detections: 100 }
    }

    #[test]
    fn decodes_boxes_and_labels() {
        let out = head(80, &[(100.0, 100.0, 40.0, 20.0, 15, 0.9)]);
        let dets = OutputDecoder::new(params()).decode(out.view(), (1.0, 1.0));

        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!(d.label, "cat");
        assert_eq!(d.class_id, 15);
        assert_eq!(d.bounding_box(), (80.0, 90.0, 120.0, 110.0));
        assert!((d.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn scales_to_frame_coordinates() {
        let out = head(80, &[(320.0, 320.0, 64.0, 64.0, 0, 0.8)]);
        let dets = OutputDecoder::new(params()).decode(out.view(), (2.0, 0.75));
        assert_eq!(dets[0].bounding_box(), (576.0, 216.0, 704.0, 264.0));
    }

    #[test]
    fn drops_low_confidence() {
        let out = head(80, &[(50.0, 50.0, 10.0, 10.0, 0, 0.2), (80.0, 80.0, 10.0, 10.0, 2, 0.3)]);
        let dets = OutputDecoder::new(params()).decode(out.view(), (1.0, 1.0));
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, "car");
    }

    #[test]
    fn suppresses_overlaps_within_a_class_only() {
        let out = head(
            80,
            &[
                (100.0, 100.0, 50.0, 50.0, 0, 0.7),
                (102.0, 101.0, 50.0, 50.0, 0, 0.9),
                (101.0, 100.0, 50.0, 50.0, 16, 0.6),
                (400.0, 400.0, 50.0, 50.0, 0, 0.5),
            ],
        );
        let dets = OutputDecoder::new(params()).decode(out.view(), (1.0, 1.0));

        let summary: Vec<_> = dets.iter().map(|d| (d.label.as_str(), d.confidence)).collect();
        assert_eq!(summary, vec![("person", 0.9), ("dog", 0.6), ("person", 0.5)]);
    }

    #[test]
    fn caps_at_max_detections() {
        let rows: Vec<_> = (0..10)
            .map(|i| (i as f32 * 60.0 + 20.0, 20.0, 30.0, 30.0, 0, 0.3 + i as f32 * 0.05))
            .collect();
        let mut p = params();
        p.max_detections = 3;
        let dets = OutputDecoder::new(p).decode(head(80, &rows).view(), (1.0, 1.0));

        assert_eq!(dets.len(), 3);
        assert!(dets.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    }

    #[test]
    fn class_allow_list_and_custom_names() {
        let cfg = InferenceConfig {
            model: crate::domain::model::ModelId { name: "custom".into(), onnx_path: "m.onnx".into() },
            params: params(),
            class_names: Some(vec!["helmet".into(), "vest".into()]),
            classes: Some(vec![1]),
            intra_threads: 1,
        };
        let out = head(2, &[(10.0, 10.0, 4.0, 4.0, 0, 0.9), (30.0, 30.0, 4.0, 4.0, 1, 0.8)]);
        let dets = OutputDecoder::from_config(&cfg).decode(out.view(), (1.0, 1.0));

        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, "vest");
    }

    #[test]
    fn accepts_candidate_major_layout() {
        let out = head(80, &[(100.0, 100.0, 40.0, 20.0, 15, 0.9)]);
        // [N, 4 + C] with N > 4 + C
        let mut rows = Array2::<f32>::zeros((100, 84));
        rows.row_mut(0).assign(&out.column(0));
        let dets = OutputDecoder::new(params()).decode(rows.view(), (1.0, 1.0));
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, "cat");
    }

    #[test]
    fn unknown_class_gets_generic_label() {
        let decoder = OutputDecoder::new(params());
        assert_eq!(decoder.label(0), "person");
        assert_eq!(decoder.label(200), "class200");
    }
}
