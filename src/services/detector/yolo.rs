//! YOLOv8 inference with tract.
//!
//! Pure-Rust path: loads the ONNX export with tract-onnx, no ONNX Runtime
//! or system libraries needed. The model output is `[1, 4 + classes, anchors]`
//! with boxes as center/size in input pixels; some exports transpose the last
//! two axes, which is detected from the shape.

use std::path::Path;

use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::error::{AppError, Result};
use crate::models::{BoundingBox, EnrichConfig, ObjectDetection};
use crate::services::detector::{Detector, class_label, render_annotated};

type RunFn = Box<dyn Fn(Tensor) -> TractResult<TVec<TValue>> + Send + Sync>;

/// YOLOv8 detector over an ONNX model.
pub struct YoloDetector {
    run: RunFn,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl YoloDetector {
    /// Load and optimize the model at `config.model_path`.
    pub fn load(config: &EnrichConfig) -> Result<Self> {
        let path = &config.model_path;
        if !path.is_file() {
            return Err(AppError::config(format!(
                "Detection model not found at {}",
                path.display()
            )));
        }

        let run = load_plan(path, config.input_size as usize).map_err(|e| {
            AppError::config(format!("Failed to load model {}: {e}", path.display()))
        })?;
        log::info!("Loaded detection model from {}", path.display());

        Ok(Self {
            run,
            input_size: config.input_size,
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
        })
    }

    fn infer(&self, image: &Path) -> Result<Vec<ObjectDetection>> {
        let source = image::open(image)
            .map_err(|e| AppError::detection(image.display(), e))?
            .to_rgb8();
        let (width, height) = source.dimensions();
        let size = self.input_size;
        let resized = image::imageops::resize(&source, size, size, FilterType::Triangle);

        let side = size as usize;
        let input: Tensor = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            f32::from(resized[(x as u32, y as u32)][c]) / 255.0
        })
        .into();

        let outputs = (self.run)(input).map_err(|e| AppError::detection(image.display(), e))?;
        let output = outputs
            .first()
            .ok_or_else(|| AppError::detection(image.display(), "model produced no output"))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| AppError::detection(image.display(), e))?;

        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(AppError::detection(
                image.display(),
                format!("unexpected output shape {shape:?}"),
            ));
        }
        let layout = OutputLayout::from_shape(shape[1], shape[2]);
        let data: Vec<f32> = view.iter().copied().collect();

        let scale = (width as f32 / size as f32, height as f32 / size as f32);
        let candidates = decode(&data, layout, self.confidence_threshold, scale, (width, height));
        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

fn load_plan(path: &Path, side: usize) -> TractResult<RunFn> {
    let plan = tract_onnx::onnx()
        .model_for_path(path)?
        .with_input_fact(0, f32::fact([1, 3, side, side]).into())?
        .into_optimized()?
        .into_runnable()?;
    Ok(Box::new(move |input: Tensor| plan.run(tvec!(input.into()))))
}

impl Detector for YoloDetector {
    fn detect(&self, image: &Path) -> Result<Vec<ObjectDetection>> {
        self.infer(image)
    }

    fn annotate(&self, image: &Path, detections: &[ObjectDetection]) -> Result<Vec<u8>> {
        render_annotated(image, detections)
    }
}

/// Position of box and class rows in the flattened model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutputLayout {
    /// 4 box coordinates + class scores
    rows: usize,
    anchors: usize,
    channels_first: bool,
}

impl OutputLayout {
    /// Anchors always outnumber rows, which tells the two layouts apart.
    fn from_shape(dim1: usize, dim2: usize) -> Self {
        if dim1 <= dim2 {
            Self { rows: dim1, anchors: dim2, channels_first: true }
        } else {
            Self { rows: dim2, anchors: dim1, channels_first: false }
        }
    }

    fn value(&self, data: &[f32], row: usize, anchor: usize) -> f32 {
        if self.channels_first {
            data[row * self.anchors + anchor]
        } else {
            data[anchor * self.rows + row]
        }
    }
}

/// Turn raw predictions into boxes in source pixel coordinates.
fn decode(
    data: &[f32],
    layout: OutputLayout,
    confidence_threshold: f32,
    scale: (f32, f32),
    bounds: (u32, u32),
) -> Vec<ObjectDetection> {
    if layout.rows <= 4 || data.len() < layout.rows * layout.anchors {
        return Vec::new();
    }

    let (max_x, max_y) = (bounds.0 as f32, bounds.1 as f32);
    let mut out = Vec::new();
    for anchor in 0..layout.anchors {
        let (class_id, confidence) = (4..layout.rows)
            .map(|row| (row - 4, layout.value(data, row, anchor)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if confidence < confidence_threshold {
            continue;
        }

        let cx = layout.value(data, 0, anchor);
        let cy = layout.value(data, 1, anchor);
        let w = layout.value(data, 2, anchor);
        let h = layout.value(data, 3, anchor);
        out.push(ObjectDetection {
            class_id,
            label: class_label(class_id),
            confidence,
            bbox: BoundingBox {
                x1: ((cx - w / 2.0) * scale.0).clamp(0.0, max_x),
                y1: ((cy - h / 2.0) * scale.1).clamp(0.0, max_y),
                x2: ((cx + w / 2.0) * scale.0).clamp(0.0, max_x),
                y2: ((cy + h / 2.0) * scale.1).clamp(0.0, max_y),
            },
        });
    }
    out
}

/// Per-class greedy NMS, highest confidence first.
fn non_max_suppression(mut candidates: Vec<ObjectDetection>, iou_threshold: f32) -> Vec<ObjectDetection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<ObjectDetection> = Vec::new();
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Channels-first output with 2 classes and 3 anchors.
    fn sample_output() -> Vec<f32> {
        // rows: cx, cy, w, h, class0, class1; columns: anchors
        vec![
            100.0, 104.0, 300.0, // cx
            100.0, 100.0, 300.0, // cy
            40.0, 40.0, 20.0, // w
            40.0, 40.0, 20.0, // h
            0.90, 0.80, 0.05, // class 0
            0.01, 0.02, 0.10, // class 1
        ]
    }

    #[test]
    fn test_layout_from_shape() {
        assert!(OutputLayout::from_shape(84, 8400).channels_first);
        assert!(!OutputLayout::from_shape(8400, 84).channels_first);
    }

    #[test]
    fn test_decode_filters_and_scales() {
        let layout = OutputLayout::from_shape(6, 3);
        let detections = decode(&sample_output(), layout, 0.25, (2.0, 1.0), (1000, 1000));

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class_id, 0);
        assert_eq!(detections[0].label, "person");
        assert_eq!(detections[0].bbox.x1, 160.0);
        assert_eq!(detections[0].bbox.x2, 240.0);
        assert_eq!(detections[0].bbox.y1, 80.0);
    }

    #[test]
    fn test_decode_transposed_layout() {
        let first = sample_output();
        let layout = OutputLayout::from_shape(6, 3);
        let mut transposed = vec![0.0; first.len()];
        for row in 0..6 {
            for anchor in 0..3 {
                transposed[anchor * 6 + row] = first[row * 3 + anchor];
            }
        }

        let a = decode(&first, layout, 0.25, (1.0, 1.0), (640, 640));
        let b = decode(&transposed, OutputLayout { rows: 6, anchors: 3, channels_first: false }, 0.25, (1.0, 1.0), (640, 640));
        assert_eq!(a, b);
    }

    #[test]
    fn test_nms_suppresses_overlapping_same_class() {
        let layout = OutputLayout::from_shape(6, 3);
        let candidates = decode(&sample_output(), layout, 0.25, (1.0, 1.0), (640, 640));
        let kept = non_max_suppression(candidates, 0.45);

        assert_eq!(kept.len(), 1);
        assert!((kept[0].confidence - 0.90).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_overlapping_different_classes() {
        let bbox = BoundingBox { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0 };
        let candidates = vec![
            ObjectDetection { class_id: 39, label: "bottle".into(), confidence: 0.8, bbox },
            ObjectDetection { class_id: 41, label: "cup".into(), confidence: 0.7, bbox },
        ];
        assert_eq!(non_max_suppression(candidates, 0.45).len(), 2);
    }

    #[test]
    fn test_load_missing_model_is_config_error() {
        let config = EnrichConfig {
            model_path: "does/not/exist.onnx".into(),
            ..EnrichConfig::default()
        };
        assert!(matches!(YoloDetector::load(&config), Err(AppError::Config(_))));
    }
}
