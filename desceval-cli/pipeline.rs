use desceval_core::{
    record_pair, AggregateMetrics, Descriptor, EvalConfig, EvalError, EvalResult, ExperimentAccumulator, Image,
    Keypoint, PairMetrics, SceneAccumulator, SceneMetrics, SkipReason, SkipRecord,
};
use desceval_describe::{Describer, DescriptorRegistry};
use desceval_match::{GeometricVerifier, GroundTruth, Matcher};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{CliResult, SourceError};
use crate::report::ExperimentRecord;
use crate::sources::{ImageSource, KeypointSource};

/// Keypoints that produced a descriptor, index-aligned with their descriptors
#[derive(Debug, Clone, Default)]
pub struct DescribedKeypoints {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl DescribedKeypoints {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Why a pair produced no metrics: an expected skip, or an error that ends the run
#[derive(Debug, Clone, PartialEq)]
pub enum PairFailure {
    Skip(SkipReason),
    Fatal(EvalError),
}

impl From<SkipReason> for PairFailure {
    fn from(reason: SkipReason) -> Self {
        PairFailure::Skip(reason)
    }
}

impl From<EvalError> for PairFailure {
    fn from(err: EvalError) -> Self {
        PairFailure::Fatal(err)
    }
}

#[derive(Debug, Clone)]
pub struct SceneOutcome {
    pub metrics: SceneMetrics,
    pub skipped: Vec<SkipRecord>,
}

#[derive(Debug, Clone)]
pub struct ExperimentOutcome {
    pub metrics: AggregateMetrics,
    /// Sorted by scene, then image
    pub skipped: Vec<SkipRecord>,
}

/// Runs patch sampling, description, matching, verification and aggregation
/// over image sequences
pub struct Evaluator {
    config: EvalConfig,
    describer: Describer,
    matcher: Matcher,
    verifier: GeometricVerifier,
}

impl Evaluator {
    /// Validate `config` and resolve its descriptor and pooling in `registry`
    pub fn new(config: EvalConfig, registry: &DescriptorRegistry) -> EvalResult<Self> {
        config.validate()?;
        let describer = Describer::from_config(&config, registry)?;
        Self::with_describer(config, describer)
    }

    /// Use `describer` regardless of the configured descriptor and pooling
    pub fn with_describer(config: EvalConfig, describer: Describer) -> EvalResult<Self> {
        config.validate()?;
        Ok(Self {
            matcher: Matcher::from_config(&config.matching)?,
            verifier: GeometricVerifier::from_config(&config.verification)?,
            describer,
            config,
        })
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub fn descriptor_id(&self) -> &str {
        self.describer.id()
    }

    pub fn describe(&self, img: &Image, keypoints: &[Keypoint]) -> EvalResult<DescribedKeypoints> {
        let described = self.describer.describe(img, keypoints)?;
        Ok(DescribedKeypoints {
            keypoints: described.keypoints(keypoints),
            descriptors: described.descriptors,
        })
    }

    /// Score one target image against the described reference.
    ///
    /// A pair whose correspondences admit no homography is still scored,
    /// with zero verified matches.
    pub fn evaluate_pair(
        &self,
        reference: &DescribedKeypoints,
        target_img: &Image,
        target_keypoints: &[Keypoint],
        ground_truth: Option<&GroundTruth>,
    ) -> Result<PairMetrics, PairFailure> {
        if target_keypoints.is_empty() {
            return Err(SkipReason::NoKeypoints.into());
        }
        let target = self.describe(target_img, target_keypoints)?;
        if target.is_empty() {
            return Err(SkipReason::NoPatches {
                keypoints: target_keypoints.len(),
            }
            .into());
        }

        let matches = self.matcher.match_descriptors(&reference.descriptors, &target.descriptors);
        let required = self.verifier.min_correspondences();
        if matches.len() < required {
            return Err(SkipReason::InsufficientCorrespondences {
                found: matches.len(),
                required,
            }
            .into());
        }
        let verified = self.verifier.verify(&reference.keypoints, &target.keypoints, &matches);

        let mut pair = record_pair(verified.len(), reference.len()).with_total_matches(matches.len());
        if let Some(gt) = ground_truth {
            pair = pair.with_ranking(gt.evaluate(
                &reference.keypoints,
                &reference.descriptors,
                &target.keypoints,
                &target.descriptors,
                &verified,
            ));
        }
        debug!(
            queries = reference.len(),
            targets = target.len(),
            matches = matches.len(),
            verified = verified.len(),
            precision = pair.precision,
            "pair evaluated"
        );
        Ok(pair)
    }

    fn load_described(
        &self,
        scene: &str,
        image: &str,
        images: &dyn ImageSource,
        keypoints: &dyn KeypointSource,
    ) -> Result<(Image, Vec<Keypoint>), SkipReason> {
        let img = images.load(scene, image).map_err(|e| {
            warn!(scene, image, error = %e, "skipping image");
            SkipReason::ImageLoad { message: e.to_string() }
        })?;
        let kps = keypoints
            .lookup(scene, image)
            .map_err(|e| SkipReason::KeypointLoad { message: e.to_string() })?;
        Ok((img, kps))
    }

    fn evaluate_target(
        &self,
        scene: &str,
        target: &str,
        reference: &DescribedKeypoints,
        images: &dyn ImageSource,
        keypoints: &dyn KeypointSource,
    ) -> Result<PairMetrics, PairFailure> {
        let (img, kps) = self.load_described(scene, target, images, keypoints)?;
        let ground_truth = images
            .ground_truth(scene, target)
            .map(|h| GroundTruth::new(h, self.config.ground_truth_tolerance));
        self.evaluate_pair(reference, &img, &kps, ground_truth.as_ref())
    }

    /// Evaluate every target of a scene against its reference image.
    ///
    /// Failures on the reference skip the whole scene, failures on a target
    /// skip that pair. Either way the cause ends up in `skipped`. A descriptor
    /// that breaks its declared dimension is an error.
    pub fn evaluate_scene(
        &self,
        scene: &str,
        images: &dyn ImageSource,
        keypoints: &dyn KeypointSource,
    ) -> EvalResult<SceneOutcome> {
        let excluded = |image: &str, reason: Option<SkipReason>| SceneOutcome {
            metrics: SceneAccumulator::default().finish(scene),
            skipped: reason.map(|r| SkipRecord::new(scene, image, r)).into_iter().collect(),
        };

        let ids = match images.images(scene) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(scene, error = %e, "cannot list scene images");
                return Ok(excluded("*", Some(SkipReason::ImageLoad { message: e.to_string() })));
            }
        };
        let Some((reference_id, targets)) = ids.split_first() else {
            warn!(scene, "scene has no images");
            return Ok(excluded("*", None));
        };

        let (reference_img, reference_kps) = match self.load_described(scene, reference_id, images, keypoints) {
            Ok(loaded) => loaded,
            Err(reason) => return Ok(excluded(reference_id, Some(reason))),
        };
        if reference_kps.is_empty() {
            return Ok(excluded(reference_id, Some(SkipReason::NoKeypoints)));
        }
        let reference = self.describe(&reference_img, &reference_kps)?;
        if reference.is_empty() {
            return Ok(excluded(
                reference_id,
                Some(SkipReason::NoPatches {
                    keypoints: reference_kps.len(),
                }),
            ));
        }

        let (acc, skipped) = targets
            .par_iter()
            .map(|target| match self.evaluate_target(scene, target, &reference, images, keypoints) {
                Ok(pair) => Ok((SceneAccumulator::from_pair(&pair), Vec::new())),
                Err(PairFailure::Skip(reason)) => {
                    debug!(scene, image = target.as_str(), %reason, "pair skipped");
                    Ok((SceneAccumulator::default(), vec![SkipRecord::new(scene, target.as_str(), reason)]))
                }
                Err(PairFailure::Fatal(err)) => Err(err),
            })
            .try_reduce(
                || (SceneAccumulator::default(), Vec::new()),
                |(a, mut skipped_a), (b, skipped_b)| {
                    skipped_a.extend(skipped_b);
                    Ok((a.merge(b), skipped_a))
                },
            )?;

        let metrics = acc.finish(scene);
        info!(
            scene,
            precision = metrics.precision,
            pairs = metrics.pair_count,
            skipped = skipped.len(),
            "scene evaluated"
        );
        Ok(SceneOutcome { metrics, skipped })
    }

    /// Evaluate all scenes, or only `selection` when it is not empty
    pub fn run(
        &self,
        images: &dyn ImageSource,
        keypoints: &dyn KeypointSource,
        selection: &[String],
    ) -> CliResult<ExperimentOutcome> {
        let mut scenes = images.scenes()?;
        if !selection.is_empty() {
            if let Some(missing) = selection.iter().find(|s| !scenes.contains(s)) {
                return Err(SourceError::UnknownScene(missing.clone()).into());
            }
            scenes.retain(|s| selection.contains(s));
        }
        info!(
            descriptor = self.descriptor_id(),
            pooling = self.describer.pooling().name(),
            scenes = scenes.len(),
            "{}",
            self.config.summary()
        );

        let (acc, mut skipped) = scenes
            .par_iter()
            .map(|scene| -> EvalResult<_> {
                let outcome = self.evaluate_scene(scene, images, keypoints)?;
                Ok((ExperimentAccumulator::from_scene(outcome.metrics), outcome.skipped))
            })
            .try_reduce(
                || (ExperimentAccumulator::default(), Vec::new()),
                |(a, mut skipped_a), (b, skipped_b)| {
                    skipped_a.extend(skipped_b);
                    Ok((a.merge(b), skipped_a))
                },
            )
            .map_err(|e| {
                warn!(error = %e, "evaluation aborted");
                e
            })?;
        skipped.sort_by(|a, b| (&a.scene, &a.image).cmp(&(&b.scene, &b.image)));

        let metrics = acc.finish();
        for scene in &metrics.excluded_scenes {
            warn!(scene = scene.as_str(), "scene produced no results");
        }
        info!(
            precision = metrics.precision,
            micro_precision = metrics.micro_precision,
            scenes = metrics.scene_count,
            skipped = skipped.len(),
            "evaluation finished"
        );
        Ok(ExperimentOutcome { metrics, skipped })
    }

    /// Record for a results sink
    pub fn record(&self, outcome: ExperimentOutcome, elapsed_secs: f64) -> ExperimentRecord {
        ExperimentRecord::new(
            self.descriptor_id(),
            self.config.name.clone(),
            &outcome.metrics,
            outcome.skipped,
            elapsed_secs,
        )
        .with_pooling(self.describer.pooling().name())
    }
}
