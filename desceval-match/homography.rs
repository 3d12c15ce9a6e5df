//! Homography estimation: normalized DLT and a seeded RANSAC wrapper.

use desceval_core::config::HOMOGRAPHY_SAMPLE_SIZE;
use desceval_core::VerifyConfig;
use nalgebra::{DMatrix, Matrix3};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{HomographyError, HomographyResult};

pub type Point2 = [f64; 2];

/// Map a point through `h`, `None` when it lands on the line at infinity
pub fn try_project(h: &Matrix3<f64>, x: f64, y: f64) -> Option<Point2> {
    let w = h[(2, 0)] * x + h[(2, 1)] * y + h[(2, 2)];
    if w.is_nan() || w.abs() < 1e-12 {
        return None;
    }
    let u = h[(0, 0)] * x + h[(0, 1)] * y + h[(0, 2)];
    let v = h[(1, 0)] * x + h[(1, 1)] * y + h[(1, 2)];
    Some([u / w, v / w])
}

/// Map a point through `h`. Points sent to infinity come back as NaN.
pub fn project(h: &Matrix3<f64>, x: f64, y: f64) -> Point2 {
    try_project(h, x, y).unwrap_or([f64::NAN, f64::NAN])
}

/// Distance between `dst` and `src` moved through `h`; NaN for points at infinity
pub fn reprojection_error(h: &Matrix3<f64>, src: &Point2, dst: &Point2) -> f64 {
    let [u, v] = project(h, src[0], src[1]);
    (u - dst[0]).hypot(v - dst[1])
}

/// Similarity that centres a point set and scales its RMS radius to sqrt(2)
#[derive(Debug, Clone, Copy)]
struct Conditioning {
    scale: f64,
    cx: f64,
    cy: f64,
}

impl Conditioning {
    fn fit(pts: &[Point2]) -> Self {
        let n = pts.len() as f64;
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
        let (cx, cy) = (sx / n, sy / n);
        let mean_sq = pts.iter().map(|p| (p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sum::<f64>() / n;
        let scale = if mean_sq > 1e-24 { (2.0 / mean_sq).sqrt() } else { 1.0 };
        Self { scale, cx, cy }
    }

    fn apply(&self, p: &Point2) -> Point2 {
        [self.scale * (p[0] - self.cx), self.scale * (p[1] - self.cy)]
    }

    fn matrix(&self) -> Matrix3<f64> {
        let s = self.scale;
        Matrix3::new(s, 0.0, -s * self.cx, 0.0, s, -s * self.cy, 0.0, 0.0, 1.0)
    }

    fn inverse_matrix(&self) -> Matrix3<f64> {
        let r = self.scale.recip();
        Matrix3::new(r, 0.0, self.cx, 0.0, r, self.cy, 0.0, 0.0, 1.0)
    }
}

/// True when any three of the points are (nearly) collinear
pub fn has_collinear_triple(pts: &[Point2]) -> bool {
    let n = pts.len();
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                let (a, b, c) = (pts[i], pts[j], pts[k]);
                let cross = (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]);
                if cross.abs() < 1e-6 {
                    return true;
                }
            }
        }
    }
    false
}

/// The two DLT constraint rows of one conditioned correspondence
fn dlt_rows(s: Point2, d: Point2) -> [[f64; 9]; 2] {
    let [x, y] = s;
    let [u, v] = d;
    [
        [0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v],
        [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y, -u],
    ]
}

/// Direct linear transform from at least four correspondences.
///
/// Returns `H` with `dst ≈ project(H, src)`, scaled so that `H[(2, 2)] = 1`.
pub fn estimate_dlt(src: &[Point2], dst: &[Point2]) -> HomographyResult<Matrix3<f64>> {
    if src.len() != dst.len() {
        return Err(HomographyError::LengthMismatch {
            src: src.len(),
            dst: dst.len(),
        });
    }
    let n = src.len();
    if n < HOMOGRAPHY_SAMPLE_SIZE {
        return Err(HomographyError::TooFewPoints {
            needed: HOMOGRAPHY_SAMPLE_SIZE,
            got: n,
        });
    }
    if src.iter().chain(dst).any(|p| !(p[0].is_finite() && p[1].is_finite())) {
        return Err(HomographyError::NumericalFailure("non-finite input point".into()));
    }

    let cond_src = Conditioning::fit(src);
    let cond_dst = Conditioning::fit(dst);

    // Pad to at least 9 rows so the SVD exposes the null vector for n = 4
    let rows = (2 * n).max(9);
    let entries = src
        .iter()
        .zip(dst)
        .flat_map(|(s, d)| dlt_rows(cond_src.apply(s), cond_dst.apply(d)))
        .flatten()
        .chain(std::iter::repeat(0.0))
        .take(rows * 9);
    let a = DMatrix::from_row_iterator(rows, 9, entries);

    let svd = a.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| HomographyError::NumericalFailure("SVD did not produce right singular vectors".into()))?;
    let (smallest, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.total_cmp(y.1))
        .ok_or_else(|| HomographyError::NumericalFailure("empty SVD".into()))?;
    let h_cond = Matrix3::from_row_iterator(v_t.row(smallest).iter().copied());

    let h = cond_dst.inverse_matrix() * h_cond * cond_src.matrix();
    let scale = h[(2, 2)];
    if !scale.is_finite() || scale.abs() < 1e-12 {
        return Err(HomographyError::NumericalFailure("homography maps the origin to infinity".into()));
    }
    let h = h / scale;
    if !h.iter().all(|v| v.is_finite()) || h.determinant().abs() < 1e-12 {
        return Err(HomographyError::DegenerateConfiguration);
    }
    Ok(h)
}

/// RANSAC settings
#[derive(Debug, Clone, PartialEq)]
pub struct RansacConfig {
    /// Inlier reprojection distance in pixels
    pub threshold: f64,
    pub max_iterations: usize,
    pub confidence: f64,
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self::from(&VerifyConfig::default())
    }
}

impl From<&VerifyConfig> for RansacConfig {
    fn from(cfg: &VerifyConfig) -> Self {
        Self {
            threshold: cfg.reprojection_threshold,
            max_iterations: cfg.max_iterations,
            confidence: cfg.confidence,
            seed: cfg.seed,
        }
    }
}

/// Best model found by [`ransac_homography`]
#[derive(Debug, Clone)]
pub struct RansacHomography {
    pub homography: Matrix3<f64>,
    /// Aligned with the input point order
    pub inlier_mask: Vec<bool>,
    pub inlier_count: usize,
    /// Mean reprojection error over inliers
    pub residual: f64,
    pub iterations: usize,
}

/// Iterations needed to draw one all-inlier sample with the given confidence
fn required_iterations(inlier_ratio: f64, confidence: f64, max_iterations: usize) -> usize {
    if inlier_ratio >= 1.0 {
        return 1;
    }
    let all_inlier = inlier_ratio.powi(HOMOGRAPHY_SAMPLE_SIZE as i32);
    if all_inlier <= f64::EPSILON {
        return max_iterations;
    }
    let needed = (1.0 - confidence).ln() / (1.0 - all_inlier).ln();
    if needed.is_finite() && needed >= 0.0 {
        (needed.ceil() as usize).clamp(1, max_iterations)
    } else {
        max_iterations
    }
}

/// Score `h` against every pair: (mask, count, mean inlier error)
fn score(h: &Matrix3<f64>, src: &[Point2], dst: &[Point2], threshold: f64) -> (Vec<bool>, usize, f64) {
    let mut mask = vec![false; src.len()];
    let mut count = 0;
    let mut total = 0.0;
    for (i, (s, d)) in src.iter().zip(dst).enumerate() {
        let err = reprojection_error(h, s, d);
        if err <= threshold {
            mask[i] = true;
            count += 1;
            total += err;
        }
    }
    let residual = if count > 0 { total / count as f64 } else { f64::INFINITY };
    (mask, count, residual)
}

/// Robust homography fit.
///
/// Minimal samples are drawn from a `StdRng` seeded with `cfg.seed`, so a
/// given input always yields the same model. Samples with collinear points
/// are skipped. The iteration budget shrinks as the best inlier ratio grows.
/// Ties in inlier count go to the lower mean error. The winner is refit on
/// its inliers and the refit is kept when it does not lose support.
pub fn ransac_homography(src: &[Point2], dst: &[Point2], cfg: &RansacConfig) -> HomographyResult<RansacHomography> {
    if src.len() != dst.len() {
        return Err(HomographyError::LengthMismatch {
            src: src.len(),
            dst: dst.len(),
        });
    }
    let n = src.len();
    if n < HOMOGRAPHY_SAMPLE_SIZE {
        return Err(HomographyError::TooFewPoints {
            needed: HOMOGRAPHY_SAMPLE_SIZE,
            got: n,
        });
    }

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut best: Option<(Matrix3<f64>, Vec<bool>, usize, f64)> = None;
    let mut budget = cfg.max_iterations;
    let mut iterations = 0;

    while iterations < budget {
        iterations += 1;
        let sample = rand::seq::index::sample(&mut rng, n, HOMOGRAPHY_SAMPLE_SIZE);
        let s4: Vec<Point2> = sample.iter().map(|i| src[i]).collect();
        let d4: Vec<Point2> = sample.iter().map(|i| dst[i]).collect();
        if has_collinear_triple(&s4) || has_collinear_triple(&d4) {
            continue;
        }
        let h = match estimate_dlt(&s4, &d4) {
            Ok(h) => h,
            Err(_) => continue,
        };

        let (mask, count, residual) = score(&h, src, dst, cfg.threshold);
        let improves = match &best {
            None => count >= HOMOGRAPHY_SAMPLE_SIZE,
            Some((_, _, best_count, best_residual)) => {
                count > *best_count || (count == *best_count && residual < *best_residual)
            }
        };
        if improves {
            budget = budget.min(required_iterations(count as f64 / n as f64, cfg.confidence, cfg.max_iterations));
            best = Some((h, mask, count, residual));
        }
    }

    let (h, mask, count, residual) = best.ok_or(HomographyError::NoConsensus)?;

    let inlier_src: Vec<Point2> = (0..n).filter(|&i| mask[i]).map(|i| src[i]).collect();
    let inlier_dst: Vec<Point2> = (0..n).filter(|&i| mask[i]).map(|i| dst[i]).collect();
    let refit = estimate_dlt(&inlier_src, &inlier_dst)
        .ok()
        .map(|h_refit| (h_refit, score(&h_refit, src, dst, cfg.threshold)))
        .filter(|(_, (_, refit_count, _))| *refit_count >= count);

    let result = match refit {
        Some((homography, (inlier_mask, inlier_count, residual))) => RansacHomography {
            homography,
            inlier_mask,
            inlier_count,
            residual,
            iterations,
        },
        None => RansacHomography {
            homography: h,
            inlier_mask: mask,
            inlier_count: count,
            residual,
            iterations,
        },
    };
    Ok(result)
}
