#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration and data-shape errors. These abort a run.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    UnknownDescriptor { id: String, available: Vec<String> },
    InvalidPatchSize(usize),
    InvalidRatioThreshold(f32),
    InvalidReprojectionThreshold(f64),
    InvalidMinCorrespondences { min_correspondences: usize, required: usize },
    InvalidSupportMultiplier(f32),
    InvalidMinRegion(usize),
    InvalidConfidence(f64),
    InvalidTolerance(f64),
    InvalidThreadCount,
    InvalidImageSize { width: usize, height: usize },
    InvalidImageData { expected_len: usize, actual_len: usize },
    InvalidPatchData { expected_len: usize, actual_len: usize },
    InvalidPooling(String),
    /// A descriptor function returned a vector of the wrong length
    DescriptorLength { id: String, expected: usize, actual: usize },
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::UnknownDescriptor { id, available } => {
                write!(f, "Unknown descriptor '{}' (available: {})", id, available.join(", "))
            }
            EvalError::InvalidPatchSize(size) => {
                write!(f, "Invalid patch size: {} (must be > 0)", size)
            }
            EvalError::InvalidRatioThreshold(r) => {
                write!(f, "Invalid ratio threshold: {} (must be in (0, 1])", r)
            }
            EvalError::InvalidReprojectionThreshold(t) => {
                write!(f, "Invalid reprojection threshold: {} px (must be finite and > 0)", t)
            }
            EvalError::InvalidMinCorrespondences { min_correspondences, required } => {
                write!(
                    f,
                    "Minimum correspondence count {} is below the {} points a homography needs",
                    min_correspondences, required
                )
            }
            EvalError::InvalidSupportMultiplier(m) => {
                write!(f, "Invalid support multiplier: {} (must be finite and > 0)", m)
            }
            EvalError::InvalidMinRegion(r) => {
                write!(f, "Invalid minimum patch region: {} px (must be > 0)", r)
            }
            EvalError::InvalidConfidence(c) => {
                write!(f, "Invalid RANSAC confidence: {} (must be in (0, 1))", c)
            }
            EvalError::InvalidTolerance(t) => {
                write!(f, "Invalid ground-truth tolerance: {} px (must be finite and > 0)", t)
            }
            EvalError::InvalidThreadCount => write!(f, "Thread count must be > 0"),
            EvalError::InvalidImageSize { width, height } => {
                write!(f, "Invalid image dimensions: {}x{} (must be > 0)", width, height)
            }
            EvalError::InvalidImageData { expected_len, actual_len } => {
                write!(f, "Image data length mismatch: expected {}, got {}", expected_len, actual_len)
            }
            EvalError::InvalidPatchData { expected_len, actual_len } => {
                write!(f, "Patch data length mismatch: expected {}, got {}", expected_len, actual_len)
            }
            EvalError::InvalidPooling(message) => write!(f, "Invalid pooling: {}", message),
            EvalError::DescriptorLength { id, expected, actual } => {
                write!(f, "Descriptor '{}' returned {} values, declared dimension is {}", id, actual, expected)
            }
        }
    }
}

impl std::error::Error for EvalError {}

pub type EvalResult<T> = Result<T, EvalError>;

/// Why a unit of work (one image or one image pair) was left out of aggregation.
/// Skips are expected outcomes, not failures.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum SkipReason {
    ImageLoad { message: String },
    KeypointLoad { message: String },
    NoKeypoints,
    /// Every patch region was clipped below the minimum size
    NoPatches { keypoints: usize },
    InsufficientCorrespondences { found: usize, required: usize },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::ImageLoad { message } => write!(f, "image failed to load: {}", message),
            SkipReason::KeypointLoad { message } => write!(f, "keypoints failed to load: {}", message),
            SkipReason::NoKeypoints => write!(f, "no keypoints"),
            SkipReason::NoPatches { keypoints } => {
                write!(f, "all {} patch regions too small", keypoints)
            }
            SkipReason::InsufficientCorrespondences { found, required } => {
                write!(f, "{} correspondences, {} required for verification", found, required)
            }
        }
    }
}

/// Diagnostic entry for a skipped image or pair
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SkipRecord {
    pub scene: String,
    pub image: String,
    pub reason: SkipReason,
}

impl SkipRecord {
    pub fn new(scene: impl Into<String>, image: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            scene: scene.into(),
            image: image.into(),
            reason,
        }
    }
}

impl std::fmt::Display for SkipRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}: {}", self.scene, self.image, self.reason)
    }
}
