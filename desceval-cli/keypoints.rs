//! Reference keypoint detection and ground-truth locked target keypoints.

use std::collections::HashMap;
use std::sync::Arc;

use desceval_core::{Image, Keypoint};
use desceval_match::project;
use image::GrayImage;
use imageproc::corners::corners_fast9;
use nalgebra::Matrix3;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::SourceResult;
use crate::sources::{ImageSource, KeypointSource};

/// FAST-9 detection settings for reference images
#[derive(Debug, Clone, PartialEq)]
pub struct DetectConfig {
    pub threshold: u8,
    /// Scale assigned to every detected keypoint
    pub keypoint_size: f32,
    /// Keypoints closer than this to the image border are dropped
    pub border: f32,
    /// Strongest keypoints kept
    pub max_keypoints: usize,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            threshold: 20,
            keypoint_size: 32.0,
            border: 40.0,
            max_keypoints: 2000,
        }
    }
}

/// FAST-9 corners filtered by border margin, strongest first
pub fn detect_keypoints(img: &Image, cfg: &DetectConfig) -> Vec<Keypoint> {
    let Some(gray) = GrayImage::from_raw(img.width as u32, img.height as u32, img.pixels.clone()) else {
        return Vec::new();
    };
    let (w, h) = (img.width as f32, img.height as f32);
    let mut keypoints: Vec<Keypoint> = corners_fast9(&gray, cfg.threshold)
        .into_iter()
        .map(|c| Keypoint::new(c.x as f32, c.y as f32, cfg.keypoint_size).with_response(c.score))
        .filter(|kp| {
            kp.x >= cfg.border && kp.y >= cfg.border && kp.x < w - cfg.border && kp.y < h - cfg.border
        })
        .collect();
    // Stable, so equal responses keep raster order
    keypoints.sort_by(|a, b| b.response.total_cmp(&a.response));
    keypoints.truncate(cfg.max_keypoints);
    keypoints
}

/// Reference keypoints moved through `h`, index-aligned with `reference`
pub fn locked_in_keypoints(reference: &[Keypoint], h: &Matrix3<f64>) -> Vec<Keypoint> {
    reference
        .iter()
        .map(|kp| {
            let [x, y] = project(h, kp.x as f64, kp.y as f64);
            kp.moved_to(x as f32, y as f32)
        })
        .collect()
}

/// Keypoints that stay at least `border` pixels inside a `width` x `height` image
pub fn filter_border(keypoints: Vec<Keypoint>, width: usize, height: usize, border: f32) -> Vec<Keypoint> {
    let (w, h) = (width as f32, height as f32);
    keypoints
        .into_iter()
        .filter(|kp| kp.x >= border && kp.y >= border && kp.x <= w - border && kp.y <= h - border)
        .collect()
}

#[derive(Debug)]
struct ReferenceDetection {
    keypoints: Vec<Keypoint>,
    width: usize,
    height: usize,
}

/// Detects on each scene's reference image and locks the result into every
/// target through its ground-truth homography. Targets without ground truth
/// get no keypoints; locked-in keypoints that leave the reference frame's
/// border margin are dropped.
///
/// Detection runs once per scene and is shared by all lookups.
pub struct DetectedKeypoints<'a> {
    images: &'a dyn ImageSource,
    cfg: DetectConfig,
    references: Mutex<HashMap<String, Arc<ReferenceDetection>>>,
}

impl<'a> DetectedKeypoints<'a> {
    pub fn new(images: &'a dyn ImageSource, cfg: DetectConfig) -> Self {
        Self {
            images,
            cfg,
            references: Mutex::new(HashMap::new()),
        }
    }

    fn reference_detection(&self, scene: &str, reference: &str) -> SourceResult<Arc<ReferenceDetection>> {
        if let Some(cached) = self.references.lock().get(scene) {
            return Ok(Arc::clone(cached));
        }
        // Detect without holding the lock, so other scenes proceed in parallel
        let img = self.images.load(scene, reference)?;
        let detection = Arc::new(ReferenceDetection {
            keypoints: detect_keypoints(&img, &self.cfg),
            width: img.width,
            height: img.height,
        });
        debug!(scene, count = detection.keypoints.len(), "reference keypoints detected");
        let mut references = self.references.lock();
        Ok(Arc::clone(references.entry(scene.to_string()).or_insert(detection)))
    }
}

impl KeypointSource for DetectedKeypoints<'_> {
    fn lookup(&self, scene: &str, image: &str) -> SourceResult<Vec<Keypoint>> {
        let images = self.images.images(scene)?;
        let Some(reference) = images.first() else {
            return Ok(Vec::new());
        };
        if reference == image {
            return Ok(self.reference_detection(scene, reference)?.keypoints.clone());
        }
        let Some(h) = self.images.ground_truth(scene, image) else {
            return Ok(Vec::new());
        };
        let detection = self.reference_detection(scene, reference)?;
        Ok(filter_border(
            locked_in_keypoints(&detection.keypoints, &h),
            detection.width,
            detection.height,
            self.cfg.border,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MemoryImages;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Isolated bright squares, each corner a FAST corner
    fn squares(width: usize, height: usize) -> Image {
        Image::from_fn(width, height, |x, y| {
            if (8..20).contains(&(x % 32)) && (8..20).contains(&(y % 32)) { 220 } else { 30 }
        })
    }

    #[test]
    fn test_detection_respects_border_and_cap() {
        let img = squares(160, 160);
        let cfg = DetectConfig {
            border: 20.0,
            max_keypoints: 10,
            ..DetectConfig::default()
        };
        let kps = detect_keypoints(&img, &cfg);
        assert!(!kps.is_empty());
        assert!(kps.len() <= 10);
        for kp in &kps {
            assert!(kp.x >= 20.0 && kp.x < 140.0 && kp.y >= 20.0 && kp.y < 140.0);
            assert_eq!(kp.size, 32.0);
        }
        assert!(kps.windows(2).all(|w| w[0].response >= w[1].response));
    }

    #[test]
    fn test_flat_image_has_no_keypoints() {
        assert!(detect_keypoints(&Image::filled(100, 100, 90), &DetectConfig::default()).is_empty());
    }

    #[test]
    fn test_locked_in_keypoints_follow_homography() {
        let h = Matrix3::new(2.0, 0.0, 5.0, 0.0, 2.0, -1.0, 0.0, 0.0, 1.0);
        let reference = vec![Keypoint::new(1.0, 2.0, 8.0).with_response(3.0), Keypoint::new(10.0, 0.0, 8.0)];
        let locked = locked_in_keypoints(&reference, &h);
        assert_eq!(locked.len(), 2);
        assert_eq!((locked[0].x, locked[0].y), (7.0, 3.0));
        assert_eq!(locked[0].response, 3.0);
        assert_eq!((locked[1].x, locked[1].y), (25.0, -1.0));
    }

    #[test]
    fn test_border_filter_uses_inclusive_margin() {
        let kps = vec![
            Keypoint::new(10.0, 50.0, 8.0),
            Keypoint::new(9.9, 50.0, 8.0),
            Keypoint::new(90.0, 50.0, 8.0),
            Keypoint::new(90.5, 50.0, 8.0),
            Keypoint::new(50.0, f32::NAN, 8.0),
        ];
        let kept = filter_border(kps, 100, 60, 10.0);
        assert_eq!(kept.iter().map(|k| k.x).collect::<Vec<_>>(), vec![10.0, 90.0]);
    }

    #[test]
    fn test_detected_source_locks_targets() {
        let img = squares(160, 160);
        let shift = Matrix3::new(1.0, 0.0, 10.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        let mut images = MemoryImages::new();
        images.push("s", "1", Some(img.clone()), Some(Matrix3::identity()));
        images.push("s", "2", Some(img.clone()), Some(shift));
        images.push("s", "3", Some(img), None);

        let source = DetectedKeypoints::new(&images, DetectConfig { border: 16.0, ..DetectConfig::default() });
        let reference = source.lookup("s", "1").unwrap();
        let target = source.lookup("s", "2").unwrap();
        assert!(!reference.is_empty());

        // Shifted keypoints past the right margin are dropped, the rest follow the shift
        let expected: Vec<(f32, f32)> = reference
            .iter()
            .map(|r| (r.x + 10.0, r.y))
            .filter(|&(x, _)| x <= 144.0)
            .collect();
        assert!(expected.len() < reference.len());
        assert_eq!(target.iter().map(|t| (t.x, t.y)).collect::<Vec<_>>(), expected);
        assert!(source.lookup("s", "3").unwrap().is_empty());
    }

    /// Counts image loads of the wrapped source
    struct CountingImages {
        inner: MemoryImages,
        loads: AtomicUsize,
    }

    impl ImageSource for CountingImages {
        fn scenes(&self) -> SourceResult<Vec<String>> {
            self.inner.scenes()
        }

        fn images(&self, scene: &str) -> SourceResult<Vec<String>> {
            self.inner.images(scene)
        }

        fn load(&self, scene: &str, image: &str) -> SourceResult<Image> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load(scene, image)
        }

        fn ground_truth(&self, scene: &str, image: &str) -> Option<Matrix3<f64>> {
            self.inner.ground_truth(scene, image)
        }
    }

    #[test]
    fn test_reference_detected_once_per_scene() {
        let mut inner = MemoryImages::new();
        for scene in ["a", "b"] {
            inner.push(scene, "1", Some(squares(160, 160)), Some(Matrix3::identity()));
            for id in ["2", "3", "4"] {
                inner.push(scene, id, Some(squares(160, 160)), Some(Matrix3::identity()));
            }
        }
        let images = CountingImages {
            inner,
            loads: AtomicUsize::new(0),
        };
        let source = DetectedKeypoints::new(&images, DetectConfig { border: 16.0, ..DetectConfig::default() });

        let first = source.lookup("a", "2").unwrap();
        for id in ["1", "3", "4", "2"] {
            assert_eq!(source.lookup("a", id).unwrap(), first);
        }
        assert_eq!(images.loads.load(Ordering::SeqCst), 1);

        source.lookup("b", "3").unwrap();
        assert_eq!(images.loads.load(Ordering::SeqCst), 2);
    }
}
