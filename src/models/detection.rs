//! Object detection structures.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// One detected object, as persisted for the batch loader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    /// Message id recovered from the image file stem
    pub message_id: String,

    /// Path of the source image
    pub media_path: String,

    /// Object class label (e.g., "bottle")
    pub detected_object_class: String,

    /// Model confidence in [0, 1]
    pub confidence_score: f64,
}

impl Detection {
    /// Build the persisted record for one model observation on an image.
    pub fn from_object(path: &Path, object: &ObjectDetection) -> Self {
        Self {
            message_id: message_id_from_path(path),
            media_path: path.display().to_string(),
            detected_object_class: object.label.clone(),
            confidence_score: f64::from(object.confidence),
        }
    }
}

/// Axis-aligned box in source image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }
}

/// Raw model observation, before it is tied to a message.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDetection {
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Message id for an image: its file name without extension.
pub fn message_id_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
