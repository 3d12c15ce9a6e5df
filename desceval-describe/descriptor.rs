use desceval_core::{Descriptor, Patch};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Maps a patch to a fixed-length, L2-normalized real vector.
///
/// Implementations must be deterministic for a given patch. Model-backed
/// descriptors live outside this crate and plug in through
/// [`crate::DescriptorRegistry::register`].
pub trait DescriptorFunction: Send + Sync {
    /// Identifier the function is registered under
    fn id(&self) -> &str;

    /// Length of every produced descriptor
    fn dimension(&self) -> usize;

    fn compute(&self, patch: &Patch) -> Descriptor;

    fn compute_batch(&self, patches: &[Patch]) -> Vec<Descriptor> {
        patches.par_iter().map(|patch| self.compute(patch)).collect()
    }
}

/// Scale to unit length in place. Near-zero vectors are left untouched.
pub fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in values.iter_mut() {
            *v /= norm;
        }
    }
}

/// Bilinear lookup inside a patch with border replication
fn sample_patch(patch: &Patch, x: f32, y: f32) -> f32 {
    let max = (patch.size() - 1) as f32;
    let x = x.clamp(0.0, max);
    let y = y.clamp(0.0, max);
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(patch.size() - 1);
    let y1 = (y0 + 1).min(patch.size() - 1);
    let dx = x - x0 as f32;
    let dy = y - y0 as f32;

    let top = patch.get(x0, y0) * (1.0 - dx) + patch.get(x1, y0) * dx;
    let bottom = patch.get(x0, y1) * (1.0 - dx) + patch.get(x1, y1) * dx;
    top * (1.0 - dy) + bottom * dy
}

/// Mean-free intensities average-pooled onto an 8x8 grid
#[derive(Debug, Clone, Default)]
pub struct RawIntensity;

impl RawIntensity {
    pub const ID: &'static str = "raw-intensity";
    const GRID: usize = 8;
}

impl DescriptorFunction for RawIntensity {
    fn id(&self) -> &str {
        Self::ID
    }

    fn dimension(&self) -> usize {
        Self::GRID * Self::GRID
    }

    fn compute(&self, patch: &Patch) -> Descriptor {
        let n = patch.size();
        let grid = Self::GRID;
        let mut sums = vec![0.0f32; grid * grid];
        let mut counts = vec![0u32; grid * grid];
        for y in 0..n {
            let cy = y * grid / n;
            for x in 0..n {
                let cell = cy * grid + x * grid / n;
                sums[cell] += patch.get(x, y);
                counts[cell] += 1;
            }
        }

        let mut desc: Descriptor = sums
            .iter()
            .zip(&counts)
            .map(|(&s, &c)| if c > 0 { s / c as f32 } else { 0.0 })
            .collect();
        let mean = desc.iter().sum::<f32>() / desc.len() as f32;
        for v in desc.iter_mut() {
            *v -= mean;
        }
        l2_normalize(&mut desc);
        desc
    }
}

/// Gaussian-weighted gradient orientation histograms over a 4x4 cell grid,
/// 8 bins per cell. Entries are clipped at 0.2 after normalization and the
/// vector is normalized again.
#[derive(Debug, Clone, Default)]
pub struct GradientHistogram;

impl GradientHistogram {
    pub const ID: &'static str = "gradient-histogram";
    const CELLS: usize = 4;
    const BINS: usize = 8;
    const CLIP: f32 = 0.2;
}

impl DescriptorFunction for GradientHistogram {
    fn id(&self) -> &str {
        Self::ID
    }

    fn dimension(&self) -> usize {
        Self::CELLS * Self::CELLS * Self::BINS
    }

    fn compute(&self, patch: &Patch) -> Descriptor {
        let n = patch.size();
        let last = n - 1;
        let centre = last as f32 * 0.5;
        let sigma = (n as f32 * 0.5).max(1.0);
        let two_sigma_sq = 2.0 * sigma * sigma;
        let mut hist = vec![0.0f32; self.dimension()];

        for y in 0..n {
            for x in 0..n {
                let gx = patch.get((x + 1).min(last), y) - patch.get(x.saturating_sub(1), y);
                let gy = patch.get(x, (y + 1).min(last)) - patch.get(x, y.saturating_sub(1));
                let magnitude = (gx * gx + gy * gy).sqrt();
                if magnitude <= 0.0 {
                    continue;
                }
                let (dx, dy) = (x as f32 - centre, y as f32 - centre);
                let weight = (-(dx * dx + dy * dy) / two_sigma_sq).exp();

                let orientation = gy.atan2(gx).rem_euclid(std::f32::consts::TAU);
                let bin = orientation / std::f32::consts::TAU * Self::BINS as f32;
                let b0 = (bin.floor() as usize) % Self::BINS;
                let b1 = (b0 + 1) % Self::BINS;
                let frac = bin - bin.floor();

                let cell = (y * Self::CELLS / n) * Self::CELLS + x * Self::CELLS / n;
                let base = cell * Self::BINS;
                hist[base + b0] += magnitude * weight * (1.0 - frac);
                hist[base + b1] += magnitude * weight * frac;
            }
        }

        l2_normalize(&mut hist);
        for v in hist.iter_mut() {
            *v = v.min(Self::CLIP);
        }
        l2_normalize(&mut hist);
        hist
    }
}

/// Pairwise intensity comparisons at seeded random locations, one `+1`/`-1`
/// entry per test, normalized to unit length.
#[derive(Debug, Clone)]
pub struct BinaryTests {
    /// (x1, y1, x2, y2) in unit patch coordinates
    tests: Vec<[f32; 4]>,
}

impl BinaryTests {
    pub const ID: &'static str = "binary-tests";
    pub const DEFAULT_SEED: u64 = 0x0b51_ef00;
    const TESTS: usize = 256;

    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let tests = (0..Self::TESTS)
            .map(|_| {
                [
                    rng.gen_range(0.0..1.0),
                    rng.gen_range(0.0..1.0),
                    rng.gen_range(0.0..1.0),
                    rng.gen_range(0.0..1.0),
                ]
            })
            .collect();
        Self { tests }
    }
}

impl Default for BinaryTests {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SEED)
    }
}

impl DescriptorFunction for BinaryTests {
    fn id(&self) -> &str {
        Self::ID
    }

    fn dimension(&self) -> usize {
        self.tests.len()
    }

    fn compute(&self, patch: &Patch) -> Descriptor {
        let scale = (patch.size() - 1) as f32;
        let mut desc: Descriptor = self
            .tests
            .iter()
            .map(|&[x1, y1, x2, y2]| {
                let a = sample_patch(patch, x1 * scale, y1 * scale);
                let b = sample_patch(patch, x2 * scale, y2 * scale);
                if a < b { 1.0 } else { -1.0 }
            })
            .collect();
        l2_normalize(&mut desc);
        desc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    fn textured(size: usize, phase: f32) -> Patch {
        Patch::from_fn(size, |x, y| {
            (0.5 + 0.5 * ((x as f32 * 0.7 + phase).sin() * (y as f32 * 0.4).cos())).clamp(0.0, 1.0)
        })
    }

    fn builtins() -> Vec<Box<dyn DescriptorFunction>> {
        vec![
            Box::new(RawIntensity),
            Box::new(GradientHistogram),
            Box::new(BinaryTests::default()),
        ]
    }

    #[test]
    fn test_dimensions_and_unit_norm() {
        let patch = textured(32, 0.0);
        for f in builtins() {
            let d = f.compute(&patch);
            assert_eq!(d.len(), f.dimension(), "{}", f.id());
            assert_relative_eq!(norm(&d), 1.0, epsilon = 1e-4);
        }
        assert_eq!(RawIntensity.dimension(), 64);
        assert_eq!(GradientHistogram.dimension(), 128);
        assert_eq!(BinaryTests::default().dimension(), 256);
    }

    #[test]
    fn test_deterministic() {
        let patch = textured(32, 1.3);
        for f in builtins() {
            assert_eq!(f.compute(&patch), f.compute(&patch), "{}", f.id());
        }
        assert_eq!(
            BinaryTests::new(7).compute(&patch),
            BinaryTests::new(7).compute(&patch)
        );
    }

    #[test]
    fn test_different_content_gives_different_descriptors() {
        let a = textured(32, 0.0);
        let b = textured(32, 2.0);
        for f in builtins() {
            assert_ne!(f.compute(&a), f.compute(&b), "{}", f.id());
        }
    }

    #[test]
    fn test_flat_patch_has_zero_raw_descriptor() {
        let flat = Patch::from_fn(16, |_, _| 0.5);
        assert!(RawIntensity.compute(&flat).iter().all(|&v| v == 0.0));
        assert!(GradientHistogram.compute(&flat).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_gradient_histogram_is_clipped() {
        let edge = Patch::from_fn(32, |x, _| if x < 16 { 0.0 } else { 1.0 });
        let d = GradientHistogram.compute(&edge);
        // A single dominant orientation would exceed the clip before renormalization
        assert!(d.iter().cloned().fold(0.0, f32::max) < 0.6);
        assert_relative_eq!(norm(&d), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_small_patches_are_handled() {
        let patch = textured(3, 0.5);
        for f in builtins() {
            assert_eq!(f.compute(&patch).len(), f.dimension());
        }
    }

    #[test]
    fn test_compute_batch_preserves_order() {
        let patches: Vec<Patch> = (0..6).map(|i| textured(16, i as f32)).collect();
        let f = GradientHistogram;
        let batch = f.compute_batch(&patches);
        for (patch, d) in patches.iter().zip(&batch) {
            assert_eq!(&f.compute(patch), d);
        }
    }

    #[test]
    fn test_l2_normalize_leaves_zero_vector() {
        let mut v = vec![0.0f32; 4];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0; 4]);
        let mut v = vec![3.0f32, 4.0];
        l2_normalize(&mut v);
        assert_relative_eq!(v[0], 0.6);
        assert_relative_eq!(v[1], 0.8);
    }
}
