use serde::{Deserialize, Serialize};

/// One object found in a frame. Box corners are pixel coordinates of the
/// frame the detector was given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: usize,
    pub label: String,
}

impl Detection {
    pub fn new(bbox: (f32, f32, f32, f32), confidence: f32, label: impl Into<String>) -> Self {
        Self {
            x1: bbox.0,
            y1: bbox.1,
            x2: bbox.2,
            y2: bbox.3,
            confidence,
            class_id: 0,
            label: label.into(),
        }
    }

    pub fn with_class_id(mut self, class_id: usize) -> Self {
        self.class_id = class_id;
        self
    }

    pub fn bounding_box(&self) -> (f32, f32, f32, f32) {
        (self.x1, self.y1, self.x2, self.y2)
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union of the two boxes, 0 when disjoint.
    pub fn iou(&self, other: &Detection) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union > 0.0 { inter / union } else { 0.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = Detection::new((0.0, 0.0, 10.0, 10.0), 0.9, "cat");
        assert!((a.iou(&a.clone()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = Detection::new((0.0, 0.0, 10.0, 10.0), 0.9, "cat");
        let b = Detection::new((20.0, 20.0, 30.0, 30.0), 0.9, "cat");
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = Detection::new((0.0, 0.0, 10.0, 10.0), 0.9, "cat");
        let b = Detection::new((5.0, 0.0, 15.0, 10.0), 0.9, "cat");
        // 50 / 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn inverted_box_has_no_area() {
        let a = Detection::new((10.0, 10.0, 5.0, 5.0), 0.5, "dog");
        assert_eq!(a.area(), 0.0);
    }
}
