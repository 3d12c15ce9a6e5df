use desceval_core::{EvalResult, Image, Keypoint, Patch, PatchConfig};
use rayon::prelude::*;

/// Extracts square, normalized patches centred on keypoints.
///
/// The sampled region has side `max(1, support_multiplier * keypoint.size)`.
/// It is clipped to the image; when the clipped width or height drops below
/// `min_region` pixels the keypoint yields no patch.
#[derive(Debug, Clone)]
pub struct PatchSampler {
    patch_size: usize,
    support_multiplier: f32,
    min_region: usize,
    rotate_to_upright: bool,
}

impl PatchSampler {
    pub fn new(patch_size: usize) -> EvalResult<Self> {
        Self::from_config(&PatchConfig {
            patch_size,
            ..PatchConfig::default()
        })
    }

    pub fn from_config(cfg: &PatchConfig) -> EvalResult<Self> {
        cfg.validate()?;
        Ok(Self {
            patch_size: cfg.patch_size,
            support_multiplier: cfg.support_multiplier,
            min_region: cfg.min_region,
            rotate_to_upright: cfg.rotate_to_upright,
        })
    }

    pub fn with_rotation(mut self, rotate_to_upright: bool) -> Self {
        self.rotate_to_upright = rotate_to_upright;
        self
    }

    /// Same sampler with the support region scaled by `factor`
    pub fn with_support_scale(&self, factor: f32) -> Self {
        Self {
            support_multiplier: self.support_multiplier * factor,
            ..self.clone()
        }
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }

    /// Patch for one keypoint, `None` when the clipped region is too small
    /// or the keypoint geometry is not finite
    pub fn extract(&self, img: &Image, kp: &Keypoint) -> Option<Patch> {
        if !(kp.x.is_finite() && kp.y.is_finite() && kp.size.is_finite()) {
            return None;
        }
        if self.rotate_to_upright && !kp.angle.is_finite() {
            return None;
        }
        let side = (self.support_multiplier * kp.size).max(1.0);
        let half = side * 0.5;

        // Pixel i covers [i - 0.5, i + 0.5] in keypoint coordinates
        let left = (kp.x - half).max(-0.5);
        let right = (kp.x + half).min(img.width as f32 - 0.5);
        let top = (kp.y - half).max(-0.5);
        let bottom = (kp.y + half).min(img.height as f32 - 0.5);

        let min = self.min_region as f32;
        if right - left < min || bottom - top < min {
            return None;
        }

        let n = self.patch_size;
        let patch = if self.rotate_to_upright {
            let (s, c) = kp.angle.to_radians().sin_cos();
            let step = side / n as f32;
            Patch::from_fn(n, |i, j| {
                let u = (i as f32 + 0.5) * step - half;
                let v = (j as f32 + 0.5) * step - half;
                let x = kp.x + c * u - s * v;
                let y = kp.y + s * u + c * v;
                normalize(img.sample_bilinear(x, y))
            })
        } else {
            let step_x = (right - left) / n as f32;
            let step_y = (bottom - top) / n as f32;
            Patch::from_fn(n, |i, j| {
                let x = left + (i as f32 + 0.5) * step_x;
                let y = top + (j as f32 + 0.5) * step_y;
                normalize(img.sample_bilinear(x, y))
            })
        };
        Some(patch)
    }

    /// Patches for every keypoint that yields one, tagged with the keypoint index
    pub fn extract_all(&self, img: &Image, kps: &[Keypoint]) -> Vec<(usize, Patch)> {
        kps.par_iter()
            .enumerate()
            .filter_map(|(idx, kp)| self.extract(img, kp).map(|patch| (idx, patch)))
            .collect()
    }
}

#[inline]
fn normalize(value: f32) -> f32 {
    (value / 255.0).clamp(0.0, 1.0)
}

/// One-off extraction with default support and minimum region.
///
/// An invalid `patch_size` is a configuration error; a keypoint that yields
/// no patch is `Ok(None)`.
pub fn extract(img: &Image, kp: &Keypoint, patch_size: usize, rotate_to_upright: bool) -> EvalResult<Option<Patch>> {
    let sampler = PatchSampler::new(patch_size)?.with_rotation(rotate_to_upright);
    Ok(sampler.extract(img, kp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use desceval_core::EvalError;
    use proptest::prelude::*;

    fn ramp(width: usize, height: usize) -> Image {
        Image::from_fn(width, height, |x, _| (x * 255 / (width - 1)) as u8)
    }

    #[test]
    fn test_uniform_image_gives_uniform_patch() {
        let img = Image::filled(64, 64, 128);
        let patch = extract(&img, &Keypoint::new(32.0, 32.0, 20.0), 16, false).unwrap().unwrap();
        assert_eq!(patch.size(), 16);
        for &v in patch.as_slice() {
            assert!((v - 128.0 / 255.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_corner_keypoint_rejected() {
        let img = Image::filled(64, 64, 10);
        assert!(extract(&img, &Keypoint::new(0.0, 0.0, 10.0), 32, false).unwrap().is_none());
        assert!(extract(&img, &Keypoint::new(-20.0, 30.0, 10.0), 32, false).unwrap().is_none());
        assert!(extract(&img, &Keypoint::new(f32::NAN, 30.0, 10.0), 32, false).unwrap().is_none());
    }

    #[test]
    fn test_tiny_scale_clamps_to_one_pixel_and_is_rejected() {
        let img = Image::filled(64, 64, 10);
        assert!(extract(&img, &Keypoint::new(30.0, 30.0, 0.0), 32, false).unwrap().is_none());
    }

    #[test]
    fn test_axis_aligned_patch_follows_ramp() {
        let img = ramp(64, 64);
        let patch = extract(&img, &Keypoint::new(32.0, 32.0, 24.0), 8, false).unwrap().unwrap();
        for j in 0..8 {
            for i in 1..8 {
                assert!(patch.get(i, j) > patch.get(i - 1, j));
            }
        }
    }

    #[test]
    fn test_upright_rotation_turns_ramp() {
        let img = ramp(64, 64);
        let kp = Keypoint::new(32.0, 32.0, 24.0).with_angle(90.0);
        let patch = extract(&img, &kp, 8, true).unwrap().unwrap();
        // Rows now run across the ramp, columns along it
        assert!(patch.get(0, 0) > patch.get(0, 7));
        assert!((patch.get(0, 3) - patch.get(7, 3)).abs() < 1e-3);
    }

    #[test]
    fn test_support_scale_widens_sampled_region() {
        let img = ramp(64, 64);
        let kp = Keypoint::new(12.0, 32.0, 16.0);
        let sampler = PatchSampler::new(8).unwrap();
        let wide = sampler.with_support_scale(2.0);
        let near = sampler.extract(&img, &kp).unwrap();
        let far = wide.extract(&img, &kp).unwrap();
        // Wider support spans more of the ramp
        let span = |p: &Patch| p.get(7, 4) - p.get(0, 4);
        assert!(span(&far) > span(&near));
        assert_eq!(wide.patch_size(), 8);
    }

    #[test]
    fn test_extract_all_keeps_keypoint_indices() {
        let img = Image::filled(64, 64, 50);
        let kps = [
            Keypoint::new(32.0, 32.0, 16.0),
            Keypoint::new(0.0, 0.0, 4.0),
            Keypoint::new(20.0, 40.0, 16.0),
        ];
        let sampler = PatchSampler::new(8).unwrap();
        let indices: Vec<usize> = sampler.extract_all(&img, &kps).into_iter().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn test_zero_patch_size_is_a_config_error() {
        assert!(PatchSampler::new(0).is_err());
        let result = extract(&Image::filled(64, 64, 100), &Keypoint::new(32.0, 32.0, 16.0), 0, false);
        assert!(matches!(result, Err(EvalError::InvalidPatchSize(0))));
    }

    #[test]
    fn test_non_finite_geometry_yields_no_patch() {
        let img = Image::filled(64, 64, 100);
        let nan_angle = Keypoint::new(32.0, 32.0, 16.0).with_angle(f32::NAN);
        assert!(extract(&img, &nan_angle, 8, true).unwrap().is_none());
        // Angle is unused without rotation
        assert!(extract(&img, &nan_angle, 8, false).unwrap().is_some());

        let inf_size = Keypoint::new(32.0, 32.0, f32::INFINITY);
        assert!(extract(&img, &inf_size, 8, true).unwrap().is_none());
        assert!(extract(&img, &inf_size, 8, false).unwrap().is_none());
        assert!(extract(&img, &Keypoint::new(32.0, 32.0, f32::NAN), 8, false).unwrap().is_none());
    }

    proptest! {
        #[test]
        fn prop_patch_shape_and_range(
            x in 0.0f32..96.0,
            y in 0.0f32..64.0,
            size in 1.0f32..60.0,
            angle in 0.0f32..360.0,
            patch_size in 1usize..40,
            rotate in any::<bool>(),
            seed in any::<u8>(),
        ) {
            let img = Image::from_fn(96, 64, |px, py| (px * 7 + py * 13 + seed as usize) as u8);
            let kp = Keypoint::new(x, y, size).with_angle(angle);
            if let Some(patch) = extract(&img, &kp, patch_size, rotate).unwrap() {
                prop_assert_eq!(patch.size(), patch_size);
                prop_assert_eq!(patch.as_slice().len(), patch_size * patch_size);
                for &v in patch.as_slice() {
                    prop_assert!((0.0..=1.0).contains(&v));
                }
            }
        }

        #[test]
        fn prop_min_region_rejection_is_monotonic(
            x in -20.0f32..84.0,
            y in -20.0f32..84.0,
            size in 1.0f32..48.0,
            small in 1usize..20,
            extra in 0usize..20,
        ) {
            let img = Image::filled(64, 64, 100);
            let kp = Keypoint::new(x, y, size);
            let lenient = PatchSampler::from_config(&PatchConfig { patch_size: 8, min_region: small, ..PatchConfig::default() }).unwrap();
            let strict = PatchSampler::from_config(&PatchConfig { patch_size: 8, min_region: small + extra, ..PatchConfig::default() }).unwrap();
            if strict.extract(&img, &kp).is_some() {
                prop_assert!(lenient.extract(&img, &kp).is_some());
            }
        }
    }
}
