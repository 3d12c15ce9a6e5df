//! Evaluation driver for local image descriptors: dataset access, the
//! per-scene pipeline and result delivery.

pub mod error;
pub mod keypoints;
pub mod pipeline;
pub mod report;
pub mod sources;
pub mod synth;

pub use desceval_core::{self, AggregateMetrics, EvalConfig, Image, Keypoint, SkipRecord};
pub use desceval_describe::{Describer, DescriptorFunction, DescriptorRegistry};
pub use error::{CliError, CliResult, SourceError, SourceResult};
pub use keypoints::{detect_keypoints, locked_in_keypoints, DetectConfig, DetectedKeypoints};
pub use pipeline::{DescribedKeypoints, Evaluator, ExperimentOutcome, PairFailure, SceneOutcome};
pub use report::{ExperimentRecord, JsonFileSink, MemorySink, ResultsSink, SceneRecord};
pub use sources::{CsvKeypoints, HPatchesDataset, ImageSource, KeypointSource, MemoryImages, MemoryKeypoints};

/// Load an evaluation config from TOML or JSON, chosen by file extension
pub fn load_config(path: &std::path::Path) -> CliResult<EvalConfig> {
    let loaded = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => EvalConfig::load_json(path),
        _ => EvalConfig::load_toml(path),
    };
    loaded.map_err(|e| CliError::Config(format!("{}: {}", path.display(), e)))
}
