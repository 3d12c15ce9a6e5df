use crate::error::{EvalError, EvalResult};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A homography has eight degrees of freedom, four point pairs fix it.
pub const HOMOGRAPHY_SAMPLE_SIZE: usize = 4;

/// Patch extraction settings
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PatchConfig {
    /// Output side length in pixels
    pub patch_size: usize,
    /// Region side = max(1, support_multiplier * keypoint.size)
    pub support_multiplier: f32,
    /// Clipped regions narrower or shorter than this are rejected
    pub min_region: usize,
    pub rotate_to_upright: bool,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            patch_size: 32,
            support_multiplier: 1.0,
            min_region: 8,
            rotate_to_upright: false,
        }
    }
}

/// Nearest-neighbour matching settings
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MatchConfig {
    /// Lowe's ratio: accept when nearest / second-nearest < ratio_threshold
    pub ratio_threshold: f32,
    /// Accept the sole candidate when the target set has exactly one descriptor
    pub accept_single_candidate: bool,
    /// Keep only mutual nearest neighbours
    pub cross_check: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            ratio_threshold: 0.8,
            accept_single_candidate: false,
            cross_check: false,
        }
    }
}

/// Homography verification settings
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct VerifyConfig {
    /// Below this many correspondences verification is not attempted
    pub min_correspondences: usize,
    /// Inlier distance in pixels
    pub reprojection_threshold: f64,
    pub max_iterations: usize,
    /// Probability of drawing at least one all-inlier sample, drives early termination
    pub confidence: f64,
    pub seed: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            min_correspondences: 10,
            reprojection_threshold: 3.0,
            max_iterations: 2000,
            confidence: 0.995,
            seed: 0,
        }
    }
}

/// How per-keypoint descriptors are combined before matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PoolingKind {
    /// One descriptor per keypoint at the configured support
    #[default]
    None,
    /// Sum of descriptors sampled at several support scales
    DomainSize,
    /// Concatenation with a second registered descriptor
    Stacking,
}

/// Whether a per-descriptor step runs on each scale or on the pooled result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PoolingStage {
    BeforePooling,
    AfterPooling,
}

/// Descriptor pooling settings
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolingConfig {
    pub kind: PoolingKind,
    /// Support scales for domain-size pooling, relative to `support_multiplier`
    pub scales: Vec<f32>,
    /// L2 normalization of each scale before summing, or only of the sum
    pub normalization: PoolingStage,
    /// RootSIFT-style L1 normalization plus signed square root
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub rooting: Option<PoolingStage>,
    /// Second descriptor for stacking
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub secondary_descriptor: Option<String>,
}

impl Default for PoolingConfig {
    fn default() -> Self {
        Self {
            kind: PoolingKind::None,
            scales: vec![0.75, 1.0, 1.25],
            normalization: PoolingStage::AfterPooling,
            rooting: None,
            secondary_descriptor: None,
        }
    }
}

/// Complete experiment configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EvalConfig {
    /// Registered descriptor identifier
    pub descriptor: String,
    pub patch: PatchConfig,
    pub matching: MatchConfig,
    pub verification: VerifyConfig,
    pub pooling: PoolingConfig,
    /// Pixel tolerance when scoring against a ground-truth homography
    pub ground_truth_tolerance: f64,
    pub n_threads: usize,
    /// Metadata
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub name: Option<String>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub description: Option<String>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            descriptor: "gradient-histogram".to_string(),
            patch: PatchConfig::default(),
            matching: MatchConfig::default(),
            verification: VerifyConfig::default(),
            pooling: PoolingConfig::default(),
            ground_truth_tolerance: 3.0,
            n_threads: num_cpus::get().max(1),
            name: None,
            description: None,
        }
    }
}

impl EvalConfig {
    /// Default configuration for the given descriptor
    pub fn new(descriptor: &str) -> Self {
        Self {
            descriptor: descriptor.to_string(),
            ..Self::default()
        }
    }

    pub fn with_descriptor(mut self, descriptor: &str) -> Self {
        self.descriptor = descriptor.to_string();
        self
    }

    pub fn with_patch_size(mut self, patch_size: usize) -> Self {
        self.patch.patch_size = patch_size;
        self
    }

    pub fn with_rotation(mut self, rotate_to_upright: bool) -> Self {
        self.patch.rotate_to_upright = rotate_to_upright;
        self
    }

    pub fn with_ratio_threshold(mut self, ratio_threshold: f32) -> Self {
        self.matching.ratio_threshold = ratio_threshold;
        self
    }

    pub fn with_single_candidate(mut self, accept: bool) -> Self {
        self.matching.accept_single_candidate = accept;
        self
    }

    pub fn with_cross_check(mut self, enable: bool) -> Self {
        self.matching.cross_check = enable;
        self
    }

    pub fn with_reprojection_threshold(mut self, threshold: f64) -> Self {
        self.verification.reprojection_threshold = threshold;
        self
    }

    pub fn with_min_correspondences(mut self, min_correspondences: usize) -> Self {
        self.verification.min_correspondences = min_correspondences;
        self
    }

    pub fn with_pooling(mut self, pooling: PoolingConfig) -> Self {
        self.pooling = pooling;
        self
    }

    pub fn with_threads(mut self, n_threads: usize) -> Self {
        self.n_threads = n_threads;
        self
    }

    /// Add metadata to configuration
    pub fn with_metadata(mut self, name: &str, description: &str) -> Self {
        self.name = Some(name.to_string());
        self.description = Some(description.to_string());
        self
    }

    /// Generate human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "EvalConfig: descriptor={}, pooling={:?}, patch={}px (x{:.2} support, upright:{}), ratio={:.2}, single:{}, cross-check:{}, min_corr={}, reproj={:.1}px, gt_tol={:.1}px, threads={}",
            self.descriptor,
            self.pooling.kind,
            self.patch.patch_size,
            self.patch.support_multiplier,
            self.patch.rotate_to_upright,
            self.matching.ratio_threshold,
            self.matching.accept_single_candidate,
            self.matching.cross_check,
            self.verification.min_correspondences,
            self.verification.reprojection_threshold,
            self.ground_truth_tolerance,
            self.n_threads
        )
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> EvalResult<()> {
        self.patch.validate()?;
        self.matching.validate()?;
        self.verification.validate()?;
        self.pooling.validate()?;
        if !(self.ground_truth_tolerance.is_finite() && self.ground_truth_tolerance > 0.0) {
            return Err(EvalError::InvalidTolerance(self.ground_truth_tolerance));
        }
        if self.n_threads == 0 {
            return Err(EvalError::InvalidThreadCount);
        }
        Ok(())
    }

    /// Save configuration to JSON file
    #[cfg(feature = "serde")]
    pub fn save_json<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from JSON file
    #[cfg(feature = "serde")]
    pub fn load_json<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Save configuration to TOML file
    #[cfg(feature = "serde")]
    pub fn save_toml<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let toml = toml::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }

    /// Load configuration from TOML file
    #[cfg(feature = "serde")]
    pub fn load_toml<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Serialize to JSON string
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON string
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML string
    #[cfg(feature = "serde")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Deserialize from TOML string
    #[cfg(feature = "serde")]
    pub fn from_toml(toml_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }
}

impl PatchConfig {
    pub fn validate(&self) -> EvalResult<()> {
        if self.patch_size == 0 {
            return Err(EvalError::InvalidPatchSize(self.patch_size));
        }
        if !(self.support_multiplier.is_finite() && self.support_multiplier > 0.0) {
            return Err(EvalError::InvalidSupportMultiplier(self.support_multiplier));
        }
        if self.min_region == 0 {
            return Err(EvalError::InvalidMinRegion(self.min_region));
        }
        Ok(())
    }
}

impl PoolingConfig {
    pub fn validate(&self) -> EvalResult<()> {
        match self.kind {
            PoolingKind::None => {}
            PoolingKind::DomainSize => {
                if self.scales.is_empty() {
                    return Err(EvalError::InvalidPooling("domain-size pooling needs at least one scale".to_string()));
                }
                if let Some(bad) = self.scales.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
                    return Err(EvalError::InvalidPooling(format!("pooling scale {} must be finite and > 0", bad)));
                }
            }
            PoolingKind::Stacking => {
                if self.secondary_descriptor.is_none() {
                    return Err(EvalError::InvalidPooling("stacking needs a secondary descriptor".to_string()));
                }
            }
        }
        Ok(())
    }
}

impl MatchConfig {
    pub fn validate(&self) -> EvalResult<()> {
        // NaN fails both comparisons
        if !(self.ratio_threshold > 0.0 && self.ratio_threshold <= 1.0) {
            return Err(EvalError::InvalidRatioThreshold(self.ratio_threshold));
        }
        Ok(())
    }
}

impl VerifyConfig {
    pub fn validate(&self) -> EvalResult<()> {
        if self.min_correspondences < HOMOGRAPHY_SAMPLE_SIZE {
            return Err(EvalError::InvalidMinCorrespondences {
                min_correspondences: self.min_correspondences,
                required: HOMOGRAPHY_SAMPLE_SIZE,
            });
        }
        if !(self.reprojection_threshold.is_finite() && self.reprojection_threshold > 0.0) {
            return Err(EvalError::InvalidReprojectionThreshold(self.reprojection_threshold));
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(EvalError::InvalidConfidence(self.confidence));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = EvalConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.patch.patch_size, 32);
        assert_eq!(cfg.patch.min_region, 8);
        assert_eq!(cfg.verification.min_correspondences, 10);
        assert!(!cfg.matching.accept_single_candidate);
    }

    #[test]
    fn test_ratio_threshold_bounds() {
        for ratio in [0.0, -0.5, 1.01, f32::NAN] {
            let cfg = EvalConfig::default().with_ratio_threshold(ratio);
            assert!(matches!(cfg.validate(), Err(EvalError::InvalidRatioThreshold(_))), "ratio {}", ratio);
        }
        for ratio in [0.01, 0.8, 1.0] {
            assert!(EvalConfig::default().with_ratio_threshold(ratio).validate().is_ok());
        }
    }

    #[test]
    fn test_zero_patch_size_rejected() {
        let cfg = EvalConfig::default().with_patch_size(0);
        assert!(matches!(cfg.validate(), Err(EvalError::InvalidPatchSize(0))));
    }

    #[test]
    fn test_verification_bounds() {
        let cfg = EvalConfig::default().with_min_correspondences(3);
        assert!(matches!(cfg.validate(), Err(EvalError::InvalidMinCorrespondences { .. })));

        let cfg = EvalConfig::default().with_reprojection_threshold(0.0);
        assert!(matches!(cfg.validate(), Err(EvalError::InvalidReprojectionThreshold(_))));

        let cfg = EvalConfig::default().with_reprojection_threshold(f64::INFINITY);
        assert!(matches!(cfg.validate(), Err(EvalError::InvalidReprojectionThreshold(_))));

        let mut cfg = EvalConfig::default();
        cfg.verification.confidence = 1.0;
        assert!(matches!(cfg.validate(), Err(EvalError::InvalidConfidence(_))));
    }

    #[test]
    fn test_pooling_validation() {
        let mut pooling = PoolingConfig {
            kind: PoolingKind::DomainSize,
            ..PoolingConfig::default()
        };
        assert!(EvalConfig::default().with_pooling(pooling.clone()).validate().is_ok());

        pooling.scales = vec![1.0, 0.0];
        let cfg = EvalConfig::default().with_pooling(pooling.clone());
        assert!(matches!(cfg.validate(), Err(EvalError::InvalidPooling(_))));
        pooling.scales.clear();
        assert!(pooling.validate().is_err());

        let stacking = PoolingConfig {
            kind: PoolingKind::Stacking,
            ..PoolingConfig::default()
        };
        assert!(matches!(stacking.validate(), Err(EvalError::InvalidPooling(_))));
        let stacking = PoolingConfig {
            secondary_descriptor: Some("raw-intensity".to_string()),
            ..stacking
        };
        assert!(stacking.validate().is_ok());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let cfg = EvalConfig::default().with_threads(0);
        assert_eq!(cfg.validate(), Err(EvalError::InvalidThreadCount));
    }

    #[test]
    fn test_summary_mentions_descriptor() {
        let cfg = EvalConfig::new("raw-intensity").with_metadata("baseline", "pooled intensities");
        assert!(cfg.summary().contains("raw-intensity"));
        assert_eq!(cfg.name.as_deref(), Some("baseline"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let cfg = EvalConfig::from_toml(
            r#"
            descriptor = "binary-tests"

            [matching]
            ratio_threshold = 0.7
            "#,
        )
        .unwrap();
        assert_eq!(cfg.descriptor, "binary-tests");
        assert_eq!(cfg.matching.ratio_threshold, 0.7);
        assert_eq!(cfg.patch, PatchConfig::default());
        assert_eq!(cfg.verification, VerifyConfig::default());
        assert_eq!(cfg.pooling, PoolingConfig::default());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_pooling_from_toml() {
        let cfg = EvalConfig::from_toml(
            r#"
            [pooling]
            kind = "domain_size"
            scales = [0.5, 1.0]
            normalization = "before_pooling"
            rooting = "after_pooling"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.pooling.kind, PoolingKind::DomainSize);
        assert_eq!(cfg.pooling.scales, vec![0.5, 1.0]);
        assert_eq!(cfg.pooling.normalization, PoolingStage::BeforePooling);
        assert_eq!(cfg.pooling.rooting, Some(PoolingStage::AfterPooling));
        assert_eq!(EvalConfig::from_toml(&cfg.to_toml().unwrap()).unwrap(), cfg);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_invalid_toml_config_rejected() {
        let result = EvalConfig::from_toml("[patch]\npatch_size = 0\n");
        assert!(result.is_err());
    }
}
