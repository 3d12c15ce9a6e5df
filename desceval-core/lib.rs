pub mod config;
pub mod error;
pub mod metrics;

pub use config::{EvalConfig, MatchConfig, PatchConfig, PoolingConfig, PoolingKind, PoolingStage, VerifyConfig};
pub use error::{EvalError, EvalResult, SkipReason, SkipRecord};
pub use metrics::{
    fold_experiment, fold_scene, record_pair, AggregateMetrics, ExperimentAccumulator, PairMetrics,
    RankingCounts, RawCounts, SceneAccumulator, SceneMetrics,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Row-major 8-bit grayscale image with its dimensions
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

impl Image {
    /// Wrap raw pixels, checking that the buffer matches the dimensions
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> EvalResult<Self> {
        if width == 0 || height == 0 {
            return Err(EvalError::InvalidImageSize { width, height });
        }
        let expected_len = width * height;
        if pixels.len() != expected_len {
            return Err(EvalError::InvalidImageData {
                expected_len,
                actual_len: pixels.len(),
            });
        }
        Ok(Self { width, height, pixels })
    }

    /// Uniform image, mostly useful for tests and padding
    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width * height],
        }
    }

    /// Build an image by evaluating `f(x, y)` for every pixel
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> u8) -> Self {
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self { width, height, pixels }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.pixels[y * self.width + x]
    }

    /// Bilinear sample at subpixel coordinates, replicating the border
    pub fn sample_bilinear(&self, x: f32, y: f32) -> f32 {
        let max_x = (self.width - 1) as f32;
        let max_y = (self.height - 1) as f32;
        let x = x.clamp(0.0, max_x);
        let y = y.clamp(0.0, max_y);

        let x0 = x.floor();
        let y0 = y.floor();
        let dx = x - x0;
        let dy = y - y0;

        let x0_idx = x0 as usize;
        let y0_idx = y0 as usize;
        let x1_idx = (x0_idx + 1).min(self.width - 1);
        let y1_idx = (y0_idx + 1).min(self.height - 1);

        let p00 = self.get(x0_idx, y0_idx) as f32;
        let p10 = self.get(x1_idx, y0_idx) as f32;
        let p01 = self.get(x0_idx, y1_idx) as f32;
        let p11 = self.get(x1_idx, y1_idx) as f32;

        let top = p00 * (1.0 - dx) + p10 * dx;
        let bottom = p01 * (1.0 - dx) + p11 * dx;

        top * (1.0 - dy) + bottom * dy
    }
}

/// Keypoint as produced by a detector: subpixel position, scale (diameter of
/// the meaningful neighbourhood), orientation in degrees, response, pyramid
/// octave and class id.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub angle: f32,
    pub response: f32,
    pub octave: i32,
    pub class_id: i32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, size: f32) -> Self {
        Self {
            x,
            y,
            size,
            angle: 0.0,
            response: 0.0,
            octave: 0,
            class_id: -1,
        }
    }

    pub fn with_angle(mut self, angle: f32) -> Self {
        self.angle = angle;
        self
    }

    pub fn with_response(mut self, response: f32) -> Self {
        self.response = response;
        self
    }

    /// Same keypoint moved to another position
    pub fn moved_to(mut self, x: f32, y: f32) -> Self {
        self.x = x;
        self.y = y;
        self
    }
}

/// Square single-channel patch with intensities in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    size: usize,
    data: Vec<f32>,
}

impl Patch {
    /// Wrap a row-major `size x size` buffer
    pub fn new(size: usize, data: Vec<f32>) -> EvalResult<Self> {
        if size == 0 {
            return Err(EvalError::InvalidPatchSize(size));
        }
        if data.len() != size * size {
            return Err(EvalError::InvalidPatchData {
                expected_len: size * size,
                actual_len: data.len(),
            });
        }
        Ok(Self { size, data })
    }

    /// Build a patch by evaluating `f(x, y)` for every cell
    pub fn from_fn(size: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(size * size);
        for y in 0..size {
            for x in 0..size {
                data.push(f(x, y));
            }
        }
        Self { size, data }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.size + x]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Fixed-length real descriptor, L2-normalized by the producing function
pub type Descriptor = Vec<f32>;

/// Putative match between a query (reference) descriptor and a train (target) descriptor
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Correspondence {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: f32,
}

/// Initialize Rayon thread pool with the specified number of threads
pub fn init_thread_pool(n_threads: usize) -> Result<(), rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .build_global()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_rejects_mismatched_buffer() {
        let result = Image::new(4, 4, vec![0; 15]);
        assert!(matches!(
            result,
            Err(EvalError::InvalidImageData { expected_len: 16, actual_len: 15 })
        ));
        assert!(matches!(
            Image::new(0, 4, Vec::new()),
            Err(EvalError::InvalidImageSize { .. })
        ));
    }

    #[test]
    fn test_bilinear_sample_interpolates_and_clamps() {
        let img = Image::from_fn(2, 2, |x, _| if x == 0 { 0 } else { 100 });
        assert_eq!(img.sample_bilinear(0.5, 0.0), 50.0);
        assert_eq!(img.sample_bilinear(-3.0, 0.0), 0.0);
        assert_eq!(img.sample_bilinear(10.0, 10.0), 100.0);
    }

    #[test]
    fn test_patch_from_fn_layout() {
        let patch = Patch::from_fn(3, |x, y| (y * 3 + x) as f32);
        assert_eq!(patch.size(), 3);
        assert_eq!(patch.get(2, 1), 5.0);
        assert_eq!(patch.as_slice().len(), 9);
    }

    #[test]
    fn test_patch_new_validates_length() {
        assert!(Patch::new(2, vec![0.0; 4]).is_ok());
        assert!(matches!(
            Patch::new(2, vec![0.0; 3]),
            Err(EvalError::InvalidPatchData { .. })
        ));
        assert!(matches!(Patch::new(0, Vec::new()), Err(EvalError::InvalidPatchSize(0))));
    }
}
