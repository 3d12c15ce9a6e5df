use desceval_core::{Correspondence, EvalResult, Keypoint, VerifyConfig};
use nalgebra::Matrix3;

use crate::homography::{ransac_homography, Point2, RansacConfig};

/// Homography estimated for one image pair with the inlier mask aligned to
/// the correspondences it was estimated from
#[derive(Debug, Clone)]
pub struct Verification {
    pub homography: Matrix3<f64>,
    pub inlier_mask: Vec<bool>,
}

impl Verification {
    pub fn inlier_count(&self) -> usize {
        self.inlier_mask.iter().filter(|&&m| m).count()
    }

    /// Inlier correspondences in their original order
    pub fn select(&self, correspondences: &[Correspondence]) -> Vec<Correspondence> {
        correspondences
            .iter()
            .zip(&self.inlier_mask)
            .filter(|(_, &inlier)| inlier)
            .map(|(c, _)| *c)
            .collect()
    }
}

/// Splits putative correspondences into homography inliers and outliers
#[derive(Debug, Clone)]
pub struct GeometricVerifier {
    min_correspondences: usize,
    ransac: RansacConfig,
}

impl GeometricVerifier {
    /// Default settings with the given inlier distance in pixels
    pub fn new(reprojection_threshold: f64) -> EvalResult<Self> {
        Self::from_config(&VerifyConfig {
            reprojection_threshold,
            ..VerifyConfig::default()
        })
    }

    pub fn from_config(cfg: &VerifyConfig) -> EvalResult<Self> {
        cfg.validate()?;
        Ok(Self {
            min_correspondences: cfg.min_correspondences,
            ransac: RansacConfig::from(cfg),
        })
    }

    pub fn min_correspondences(&self) -> usize {
        self.min_correspondences
    }

    pub fn reprojection_threshold(&self) -> f64 {
        self.ransac.threshold
    }

    /// Fit a homography mapping `keypoints_a[query_idx]` to `keypoints_b[train_idx]`.
    ///
    /// `None` when there are fewer than `min_correspondences` correspondences,
    /// an index is out of range, or no model is found.
    pub fn estimate(
        &self,
        keypoints_a: &[Keypoint],
        keypoints_b: &[Keypoint],
        correspondences: &[Correspondence],
    ) -> Option<Verification> {
        if correspondences.len() < self.min_correspondences {
            return None;
        }

        let mut src: Vec<Point2> = Vec::with_capacity(correspondences.len());
        let mut dst: Vec<Point2> = Vec::with_capacity(correspondences.len());
        for c in correspondences {
            let a = keypoints_a.get(c.query_idx)?;
            let b = keypoints_b.get(c.train_idx)?;
            src.push([a.x as f64, a.y as f64]);
            dst.push([b.x as f64, b.y as f64]);
        }

        let fit = ransac_homography(&src, &dst, &self.ransac).ok()?;
        Some(Verification {
            homography: fit.homography,
            inlier_mask: fit.inlier_mask,
        })
    }

    /// Inlier subset of `correspondences`, empty when verification is not possible
    pub fn verify(
        &self,
        keypoints_a: &[Keypoint],
        keypoints_b: &[Keypoint],
        correspondences: &[Correspondence],
    ) -> Vec<Correspondence> {
        self.estimate(keypoints_a, keypoints_b, correspondences)
            .map(|v| v.select(correspondences))
            .unwrap_or_default()
    }
}
