pub mod descriptor;
pub mod patch;
pub mod pooling;
pub mod registry;

pub use descriptor::{l2_normalize, BinaryTests, DescriptorFunction, GradientHistogram, RawIntensity};
pub use patch::{extract, PatchSampler};
pub use pooling::{root_descriptor, Pooling, StackedDescriptor};
pub use registry::DescriptorRegistry;

use std::sync::Arc;

use rayon::prelude::*;

use desceval_core::{Descriptor, EvalConfig, EvalError, EvalResult, Image, Keypoint, Patch, PoolingKind, PoolingStage};

/// Descriptors of one image, aligned with the keypoints that produced a patch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescribedImage {
    /// Index into the original keypoint list for every descriptor
    pub keypoint_indices: Vec<usize>,
    pub descriptors: Vec<Descriptor>,
}

impl DescribedImage {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Keypoints in descriptor order
    pub fn keypoints(&self, all: &[Keypoint]) -> Vec<Keypoint> {
        self.keypoint_indices.iter().map(|&i| all[i]).collect()
    }
}

/// Error unless every descriptor has the length `function` declares
pub fn check_dimension(function: &dyn DescriptorFunction, descriptors: &[Descriptor]) -> EvalResult<()> {
    let expected = function.dimension();
    match descriptors.iter().find(|d| d.len() != expected) {
        Some(bad) => Err(EvalError::DescriptorLength {
            id: function.id().to_string(),
            expected,
            actual: bad.len(),
        }),
        None => Ok(()),
    }
}

/// Sample patches around `keypoints` and run `function` on them
pub fn describe_image(
    sampler: &PatchSampler,
    function: &dyn DescriptorFunction,
    img: &Image,
    keypoints: &[Keypoint],
) -> EvalResult<DescribedImage> {
    let (keypoint_indices, patches): (Vec<usize>, Vec<_>) = sampler.extract_all(img, keypoints).into_iter().unzip();
    let descriptors = function.compute_batch(&patches);
    check_dimension(function, &descriptors)?;
    Ok(DescribedImage {
        keypoint_indices,
        descriptors,
    })
}

/// The describe step: patch sampling, a descriptor function and pooling
#[derive(Clone)]
pub struct Describer {
    sampler: PatchSampler,
    function: Arc<dyn DescriptorFunction>,
    pooling: Pooling,
    rooting: Option<PoolingStage>,
}

impl Describer {
    /// Fails when `function` does not honour its declared dimension
    pub fn new(sampler: PatchSampler, function: Arc<dyn DescriptorFunction>) -> EvalResult<Self> {
        let n = sampler.patch_size();
        let sample = Patch::from_fn(n, |x, y| ((x * 3 + y * 5) % 7) as f32 / 6.0);
        check_dimension(function.as_ref(), &[function.compute(&sample)])?;
        Ok(Self {
            sampler,
            function,
            pooling: Pooling::None,
            rooting: None,
        })
    }

    /// Resolve the configured descriptor, stacking partner and pooling
    pub fn from_config(config: &EvalConfig, registry: &DescriptorRegistry) -> EvalResult<Self> {
        config.pooling.validate()?;
        let sampler = PatchSampler::from_config(&config.patch)?;
        let primary = registry.get(&config.descriptor)?;
        let pool = &config.pooling;

        let function: Arc<dyn DescriptorFunction> = match pool.kind {
            PoolingKind::Stacking => {
                let secondary_id = pool
                    .secondary_descriptor
                    .as_deref()
                    .ok_or_else(|| EvalError::InvalidPooling("stacking needs a secondary descriptor".into()))?;
                Arc::new(StackedDescriptor::new(primary, registry.get(secondary_id)?))
            }
            PoolingKind::None | PoolingKind::DomainSize => primary,
        };
        let pooling = match pool.kind {
            PoolingKind::DomainSize => Pooling::DomainSize {
                scales: pool.scales.clone(),
                normalization: pool.normalization,
            },
            PoolingKind::None | PoolingKind::Stacking => Pooling::None,
        };
        Ok(Self::new(sampler, function)?.with_pooling(pooling).with_rooting(pool.rooting))
    }

    pub fn with_pooling(mut self, pooling: Pooling) -> Self {
        self.pooling = pooling;
        self
    }

    pub fn with_rooting(mut self, rooting: Option<PoolingStage>) -> Self {
        self.rooting = rooting;
        self
    }

    pub fn id(&self) -> &str {
        self.function.id()
    }

    pub fn pooling(&self) -> &Pooling {
        &self.pooling
    }

    pub fn dimension(&self) -> usize {
        self.function.dimension()
    }

    pub fn describe(&self, img: &Image, keypoints: &[Keypoint]) -> EvalResult<DescribedImage> {
        match &self.pooling {
            Pooling::None => {
                let mut described = describe_image(&self.sampler, self.function.as_ref(), img, keypoints)?;
                if self.rooting.is_some() {
                    for d in &mut described.descriptors {
                        root_descriptor(d);
                    }
                }
                Ok(described)
            }
            Pooling::DomainSize { scales, normalization } => self.describe_pooled(img, keypoints, scales, *normalization),
        }
    }

    fn describe_pooled(
        &self,
        img: &Image,
        keypoints: &[Keypoint],
        scales: &[f32],
        normalization: PoolingStage,
    ) -> EvalResult<DescribedImage> {
        let samplers: Vec<PatchSampler> = scales.iter().map(|&s| self.sampler.with_support_scale(s)).collect();
        let pooled = keypoints
            .par_iter()
            .enumerate()
            .filter_map(|(idx, kp)| {
                let patches = samplers.iter().map(|s| s.extract(img, kp)).collect::<Option<Vec<_>>>()?;
                Some((idx, patches))
            })
            .map(|(idx, patches)| {
                let per_scale: Vec<Descriptor> = patches.iter().map(|p| self.function.compute(p)).collect();
                check_dimension(self.function.as_ref(), &per_scale)?;
                Ok((idx, pooling::pool_domain_size(per_scale, normalization, self.rooting)))
            })
            .collect::<EvalResult<Vec<_>>>()?;
        let (keypoint_indices, descriptors) = pooled.into_iter().unzip();
        Ok(DescribedImage {
            keypoint_indices,
            descriptors,
        })
    }
}

impl std::fmt::Debug for Describer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Describer")
            .field("function", &self.function.id())
            .field("pooling", &self.pooling)
            .field("rooting", &self.rooting)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use desceval_core::PoolingConfig;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    fn textured() -> Image {
        Image::from_fn(96, 96, |x, y| ((x * 31 + y * 17 + x * y) % 256) as u8)
    }

    /// Claims 32 values, returns 31
    struct ShortDescriptor;

    impl DescriptorFunction for ShortDescriptor {
        fn id(&self) -> &str {
            "short"
        }

        fn dimension(&self) -> usize {
            32
        }

        fn compute(&self, _patch: &Patch) -> Descriptor {
            vec![0.1; 31]
        }
    }

    #[test]
    fn test_describe_image_skips_rejected_keypoints() {
        let img = Image::from_fn(64, 64, |x, y| ((x * 31 + y * 17) % 256) as u8);
        let kps = [
            Keypoint::new(32.0, 32.0, 16.0),
            Keypoint::new(0.0, 63.0, 4.0),
            Keypoint::new(40.0, 20.0, 16.0),
        ];
        let sampler = PatchSampler::new(16).unwrap();
        let described = describe_image(&sampler, &GradientHistogram, &img, &kps).unwrap();

        assert_eq!(described.keypoint_indices, vec![0, 2]);
        assert_eq!(described.len(), 2);
        assert!(described.descriptors.iter().all(|d| d.len() == 128));
        assert_eq!(described.keypoints(&kps), vec![kps[0], kps[2]]);
    }

    #[test]
    fn test_describe_image_without_keypoints() {
        let img = Image::filled(16, 16, 0);
        let sampler = PatchSampler::new(8).unwrap();
        assert!(describe_image(&sampler, &RawIntensity, &img, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_descriptor_length_is_a_data_error() {
        let sampler = PatchSampler::new(8).unwrap();
        let kps = [Keypoint::new(48.0, 48.0, 16.0)];
        let err = describe_image(&sampler, &ShortDescriptor, &textured(), &kps).unwrap_err();
        assert_eq!(
            err,
            EvalError::DescriptorLength {
                id: "short".into(),
                expected: 32,
                actual: 31
            }
        );
        // Caught before any image is seen
        assert!(matches!(
            Describer::new(sampler, Arc::new(ShortDescriptor)),
            Err(EvalError::DescriptorLength { actual: 31, .. })
        ));
    }

    #[test]
    fn test_domain_size_pooling_keeps_dimension_and_unit_norm() {
        let config = EvalConfig::default().with_pooling(PoolingConfig {
            kind: PoolingKind::DomainSize,
            scales: vec![0.5, 1.0, 2.0],
            ..PoolingConfig::default()
        });
        let describer = Describer::from_config(&config, &DescriptorRegistry::with_builtins()).unwrap();
        assert_eq!(describer.pooling().name(), "domain-size");
        assert_eq!(describer.dimension(), 128);

        let kps = [Keypoint::new(48.0, 48.0, 16.0), Keypoint::new(48.0, 20.0, 12.0)];
        let described = describer.describe(&textured(), &kps).unwrap();
        // Half of a 12 px support is under the 8 px minimum region
        assert_eq!(described.keypoint_indices, vec![0]);
        assert_eq!(described.descriptors[0].len(), 128);
        assert_relative_eq!(norm(&described.descriptors[0]), 1.0, epsilon = 1e-5);

        let single = Describer::from_config(&EvalConfig::default(), &DescriptorRegistry::with_builtins())
            .unwrap()
            .describe(&textured(), &kps)
            .unwrap();
        assert_eq!(single.keypoint_indices, vec![0, 1]);
        assert_ne!(single.descriptors[0], described.descriptors[0]);
    }

    #[test]
    fn test_stacking_resolves_secondary_from_registry() {
        let config = EvalConfig::new("raw-intensity").with_pooling(PoolingConfig {
            kind: PoolingKind::Stacking,
            secondary_descriptor: Some("binary-tests".into()),
            ..PoolingConfig::default()
        });
        let registry = DescriptorRegistry::with_builtins();
        let describer = Describer::from_config(&config, &registry).unwrap();
        assert_eq!(describer.id(), "raw-intensity+binary-tests");
        assert_eq!(describer.dimension(), 64 + 256);

        let described = describer.describe(&textured(), &[Keypoint::new(48.0, 48.0, 16.0)]).unwrap();
        assert_eq!(described.descriptors[0].len(), 320);
        assert_relative_eq!(norm(&described.descriptors[0]), 1.0, epsilon = 1e-5);

        let unknown = config.clone().with_pooling(PoolingConfig {
            kind: PoolingKind::Stacking,
            secondary_descriptor: Some("sift".into()),
            ..PoolingConfig::default()
        });
        assert!(matches!(
            Describer::from_config(&unknown, &registry),
            Err(EvalError::UnknownDescriptor { .. })
        ));
    }

    #[test]
    fn test_rooting_without_pooling_keeps_unit_norm() {
        let config = EvalConfig::default().with_pooling(PoolingConfig {
            rooting: Some(PoolingStage::AfterPooling),
            ..PoolingConfig::default()
        });
        let describer = Describer::from_config(&config, &DescriptorRegistry::with_builtins()).unwrap();
        let described = describer.describe(&textured(), &[Keypoint::new(48.0, 48.0, 16.0)]).unwrap();
        let d = &described.descriptors[0];
        assert_relative_eq!(norm(d), 1.0, epsilon = 1e-5);
        // Histogram bins are non-negative, so rooting keeps them so
        assert!(d.iter().all(|&v| v >= 0.0));
    }
}
