// src/pipeline/enrich.rs

//! Bounded detection enrichment over the media root.
//!
//! Images are visited in lexicographic path order. Only images the model
//! actually processed count toward `max_images`; missing or empty files and
//! per-image model failures are skipped without consuming a slot.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::{DirEntry, WalkDir};

use crate::error::{AppError, Result};
use crate::models::{Detection, EnrichConfig, PathsConfig};
use crate::services::Detector;
use crate::utils::fs::{write_atomic_sync, write_json_atomic_sync};

/// What happened to one visited image.
#[derive(Debug)]
pub enum ImageOutcome {
    /// Model ran; `annotated` is set when at least one object was found
    Processed {
        detections: usize,
        annotated: Option<PathBuf>,
    },
    /// Precondition failed before the model was invoked
    Skipped(AppError),
    /// Model failed on this image
    Failed(AppError),
}

/// Result of one enrichment pass.
#[derive(Debug, Default)]
pub struct EnrichSummary {
    /// Outcome per visited image, in visit order
    pub outcomes: Vec<(PathBuf, ImageOutcome)>,
    /// Images left unvisited once the cap was reached
    pub untouched: usize,
    /// Every detection written to the output file
    pub detections: Vec<Detection>,
    pub output: PathBuf,
}

impl EnrichSummary {
    pub fn processed(&self) -> usize {
        self.count(|o| matches!(o, ImageOutcome::Processed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ImageOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ImageOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&ImageOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Runs a [`Detector`] over the media root. Blocking.
pub struct DetectionEnricher {
    detector: Arc<dyn Detector>,
    config: EnrichConfig,
    paths: PathsConfig,
}

impl DetectionEnricher {
    pub fn new(detector: Arc<dyn Detector>, config: EnrichConfig, paths: PathsConfig) -> Self {
        Self {
            detector,
            config,
            paths,
        }
    }

    /// Image files under the media root, excluding annotated output.
    pub fn candidates(&self) -> Vec<PathBuf> {
        // compared canonically so `./media/detected` and `media/detected` match
        let detected_dir = std::fs::canonicalize(&self.paths.detected_dir).ok();
        let is_detected_dir = |entry: &DirEntry| {
            entry.file_type().is_dir()
                && detected_dir.as_deref().is_some_and(|detected| {
                    std::fs::canonicalize(entry.path()).is_ok_and(|path| path == detected)
                })
        };
        WalkDir::new(&self.paths.media_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_detected_dir(entry))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::warn!("Skipping unreadable media entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && self.config.is_image(entry.path()))
            .map(|entry| entry.into_path())
            .collect()
    }

    /// Run one enrichment pass and replace the detections file.
    pub fn run(&self) -> Result<EnrichSummary> {
        let candidates = self.candidates();
        log::info!(
            "Found {} candidate images under {}",
            candidates.len(),
            self.paths.media_dir.display()
        );

        let mut summary = EnrichSummary {
            output: self.paths.detections_file.clone(),
            ..Default::default()
        };
        let mut processed = 0;

        for (index, path) in candidates.iter().enumerate() {
            if processed >= self.config.max_images {
                summary.untouched = candidates.len() - index;
                break;
            }

            let outcome = match self.process(path, &mut summary.detections) {
                Ok(outcome) => outcome,
                Err(e @ AppError::Precondition { .. }) => {
                    log::warn!("Skipping image: {}", e);
                    ImageOutcome::Skipped(e)
                }
                Err(e) => {
                    log::error!("Error processing {}: {}", path.display(), e);
                    ImageOutcome::Failed(e)
                }
            };
            if matches!(outcome, ImageOutcome::Processed { .. }) {
                processed += 1;
            }
            summary.outcomes.push((path.clone(), outcome));
        }

        write_json_atomic_sync(&self.paths.detections_file, &summary.detections)?;
        log::info!(
            "Processed {} images, {} detections written to {}",
            processed,
            summary.detections.len(),
            summary.output.display()
        );
        Ok(summary)
    }

    fn process(&self, path: &Path, out: &mut Vec<Detection>) -> Result<ImageOutcome> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| AppError::precondition(path.display(), e))?;
        if metadata.len() == 0 {
            return Err(AppError::precondition(path.display(), "empty file"));
        }

        let objects = self.detector.detect(path)?;
        log::debug!("{}: {} objects", path.display(), objects.len());

        let annotated = if objects.is_empty() {
            None
        } else {
            let target = self.annotated_path(path);
            // annotation failure does not discard the detections
            match self
                .detector
                .annotate(path, &objects)
                .and_then(|bytes| write_atomic_sync(&target, &bytes))
            {
                Ok(()) => Some(target),
                Err(e) => {
                    log::warn!("Could not write annotated copy of {}: {}", path.display(), e);
                    None
                }
            }
        };

        out.extend(objects.iter().map(|o| Detection::from_object(path, o)));
        Ok(ImageOutcome::Processed {
            detections: objects.len(),
            annotated,
        })
    }

    /// `{detected_dir}/detected_{parent}_{file}`
    fn annotated_path(&self, path: &Path) -> PathBuf {
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match path.parent().and_then(|p| p.file_name()) {
            Some(parent) => format!("detected_{}_{}", parent.to_string_lossy(), file),
            None => format!("detected_{file}"),
        };
        self.paths.detected_dir.join(name)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    use tempfile::TempDir;

    use crate::models::{BoundingBox, ObjectDetection};

    /// Fails on file names containing `bad`, finds nothing in `empty`,
    /// otherwise one bottle.
    #[derive(Default)]
    pub(crate) struct ScriptedDetector {
        pub calls: Mutex<Vec<PathBuf>>,
    }

    impl Detector for ScriptedDetector {
        fn detect(&self, image: &Path) -> Result<Vec<ObjectDetection>> {
            self.calls.lock().unwrap().push(image.to_path_buf());
            let name = image.file_name().unwrap().to_string_lossy().into_owned();
            if name.contains("bad") {
                return Err(AppError::detection(image.display(), "corrupt image"));
            }
            if name.contains("empty") {
                return Ok(Vec::new());
            }
            Ok(vec![ObjectDetection {
                class_id: 39,
                label: "bottle".into(),
                confidence: 0.5,
                bbox: BoundingBox { x1: 0.0, y1: 0.0, x2: 4.0, y2: 4.0 },
            }])
        }

        fn annotate(&self, _image: &Path, _detections: &[ObjectDetection]) -> Result<Vec<u8>> {
            Ok(b"annotated".to_vec())
        }
    }

    struct Fixture {
        _tmp: TempDir,
        paths: PathsConfig,
        detector: Arc<ScriptedDetector>,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let paths = PathsConfig::rooted(tmp.path());
            Self {
                _tmp: tmp,
                paths,
                detector: Arc::new(ScriptedDetector::default()),
            }
        }

        fn image(&self, channel: &str, name: &str, bytes: &[u8]) -> PathBuf {
            let dir = self.paths.media_dir.join("2025-03-01").join(channel);
            std::fs::create_dir_all(&dir).unwrap();
            let path = dir.join(name);
            std::fs::write(&path, bytes).unwrap();
            path
        }

        fn run(&self, max_images: usize) -> EnrichSummary {
            let config = EnrichConfig {
                max_images,
                ..EnrichConfig::default()
            };
            DetectionEnricher::new(self.detector.clone(), config, self.paths.clone())
                .run()
                .unwrap()
        }

        fn output(&self) -> Vec<Detection> {
            let content = std::fs::read_to_string(&self.paths.detections_file).unwrap();
            serde_json::from_str(&content).unwrap()
        }
    }

    #[test]
    fn test_cap_limits_processed_images() {
        let fx = Fixture::new();
        for i in 0..25 {
            fx.image("X", &format!("{:02}.jpg", i), b"img");
        }

        let summary = fx.run(20);

        assert_eq!(summary.processed(), 20);
        assert_eq!(summary.untouched, 5);
        assert_eq!(fx.detector.calls.lock().unwrap().len(), 20);

        let output = fx.output();
        assert_eq!(output.len(), 20);
        assert_eq!(output[0].message_id, "00");
        assert_eq!(output[19].message_id, "19");
        assert_eq!(output[0].detected_object_class, "bottle");
    }

    #[test]
    fn test_empty_file_skipped_without_consuming_slot() {
        let fx = Fixture::new();
        fx.image("X", "1.jpg", b"");
        fx.image("X", "2.jpg", b"img");
        fx.image("X", "3.jpg", b"img");
        fx.image("X", "4.jpg", b"img");

        let summary = fx.run(2);

        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.processed(), 2);
        assert_eq!(summary.untouched, 1);
        assert!(matches!(summary.outcomes[0].1, ImageOutcome::Skipped(AppError::Precondition { .. })));
        // the model never saw the empty file
        assert!(!fx.detector.calls.lock().unwrap().iter().any(|p| p.ends_with("1.jpg")));
    }

    #[test]
    fn test_detection_failure_skipped_without_consuming_slot() {
        let fx = Fixture::new();
        fx.image("X", "1_bad.jpg", b"img");
        fx.image("X", "2.jpg", b"img");
        fx.image("X", "3.jpg", b"img");

        let summary = fx.run(2);

        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.processed(), 2);
        assert_eq!(fx.output().len(), 2);
    }

    #[test]
    fn test_annotated_copy_only_when_objects_found() {
        let fx = Fixture::new();
        fx.image("X", "1.jpg", b"img");
        fx.image("X", "2_empty.jpg", b"img");

        let summary = fx.run(20);

        // zero detections still counts as processed
        assert_eq!(summary.processed(), 2);
        let annotated = fx.paths.detected_dir.join("detected_X_1.jpg");
        assert_eq!(std::fs::read(&annotated).unwrap(), b"annotated");
        assert!(!fx.paths.detected_dir.join("detected_X_2_empty.jpg").exists());
        assert!(matches!(
            &summary.outcomes[1].1,
            ImageOutcome::Processed { detections: 0, annotated: None }
        ));
        assert_eq!(fx.output().len(), 1);
    }

    #[test]
    fn test_annotated_names_do_not_collide_across_channels() {
        let fx = Fixture::new();
        fx.image("A", "7.jpg", b"img");
        fx.image("B", "7.jpg", b"img");

        fx.run(20);

        assert!(fx.paths.detected_dir.join("detected_A_7.jpg").exists());
        assert!(fx.paths.detected_dir.join("detected_B_7.jpg").exists());
    }

    #[test]
    fn test_detected_dir_and_non_images_ignored() {
        let fx = Fixture::new();
        fx.image("X", "1.jpg", b"img");
        fx.image("X", "notes.txt", b"text");
        std::fs::create_dir_all(&fx.paths.detected_dir).unwrap();
        std::fs::write(fx.paths.detected_dir.join("detected_X_0.jpg"), b"img").unwrap();

        let summary = fx.run(20);

        assert_eq!(summary.outcomes.len(), 1);
        assert!(summary.outcomes[0].0.ends_with("1.jpg"));
    }

    #[test]
    fn test_detected_dir_ignored_under_other_spelling() {
        let mut fx = Fixture::new();
        fx.image("X", "1.jpg", b"img");
        fx.paths.detected_dir = fx.paths.media_dir.join("2025-03-01").join("..").join("detected");
        std::fs::create_dir_all(&fx.paths.detected_dir).unwrap();
        std::fs::write(fx.paths.media_dir.join("detected").join("detected_X_0.jpg"), b"img").unwrap();

        let summary = fx.run(20);

        assert_eq!(summary.outcomes.len(), 1);
        assert!(summary.outcomes[0].0.ends_with("1.jpg"));
        assert!(fx.paths.media_dir.join("detected").join("detected_X_1.jpg").exists());
    }

    #[test]
    fn test_output_replaced_each_pass() {
        let fx = Fixture::new();
        std::fs::create_dir_all(fx.paths.detections_file.parent().unwrap()).unwrap();
        std::fs::write(&fx.paths.detections_file, b"stale").unwrap();

        let summary = fx.run(20);

        assert_eq!(summary.processed(), 0);
        assert!(fx.output().is_empty());
    }

    #[test]
    fn test_missing_media_root_yields_empty_pass() {
        let fx = Fixture::new();
        let summary = fx.run(20);
        assert!(summary.outcomes.is_empty());
        assert_eq!(summary.untouched, 0);
    }
}
