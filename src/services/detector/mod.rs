//! Object detection model abstraction.
//!
//! The enricher only talks to [`Detector`]; the ONNX-backed implementation
//! lives behind the `detect` feature.

#[cfg(feature = "detect")]
mod annotate;
#[cfg(feature = "detect")]
mod yolo;

use std::path::Path;

use crate::error::Result;
use crate::models::ObjectDetection;

#[cfg(feature = "detect")]
pub use annotate::render_annotated;
#[cfg(feature = "detect")]
pub use yolo::YoloDetector;

/// Blocking object detector.
///
/// Both calls may take seconds; run them on a blocking thread.
pub trait Detector: Send + Sync {
    /// Detect objects in the image at `image`.
    fn detect(&self, image: &Path) -> Result<Vec<ObjectDetection>>;

    /// Render a copy of `image` with `detections` drawn on it, encoded in the
    /// source image's format. Nothing is written to disk.
    fn annotate(&self, image: &Path, detections: &[ObjectDetection]) -> Result<Vec<u8>>;
}

/// COCO class names, indexed by YOLO class id.
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Label for a class id, falling back to `class_<id>` outside the COCO set.
pub fn class_label(class_id: usize) -> String {
    COCO_CLASSES
        .get(class_id)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("class_{class_id}"))
}
