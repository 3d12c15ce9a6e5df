use std::path::PathBuf;

use desceval_core::{AggregateMetrics, RawCounts, SceneMetrics, SkipRecord};
use serde::{Deserialize, Serialize};

use crate::error::CliResult;

/// Per-scene line of an [`ExperimentRecord`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    pub scene: String,
    pub precision: f64,
    pub pairs: usize,
    pub excluded_pairs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recall: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_average_precision: Option<f64>,
}

impl From<&SceneMetrics> for SceneRecord {
    fn from(scene: &SceneMetrics) -> Self {
        Self {
            scene: scene.scene.clone(),
            precision: scene.precision,
            pairs: scene.pair_count,
            excluded_pairs: scene.excluded_pairs,
            recall: scene.recall(),
            mean_average_precision: scene.mean_average_precision(),
        }
    }
}

/// Everything a results store receives about one experiment run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub descriptor: String,
    /// Pooling strategy name, "none" for plain descriptors
    #[serde(default = "no_pooling")]
    pub pooling: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_name: Option<String>,
    pub scenes: Vec<String>,
    pub scene_results: Vec<SceneRecord>,
    pub excluded_scenes: Vec<String>,
    pub precision: f64,
    pub micro_precision: f64,
    pub recall: Option<f64>,
    pub mean_average_precision: Option<f64>,
    pub precision_at_1: Option<f64>,
    pub precision_at_5: Option<f64>,
    pub precision_at_10: Option<f64>,
    pub counts: RawCounts,
    pub skipped: Vec<SkipRecord>,
    pub elapsed_secs: f64,
}

fn no_pooling() -> String {
    "none".to_string()
}

impl ExperimentRecord {
    pub fn new(
        descriptor: &str,
        config_name: Option<String>,
        metrics: &AggregateMetrics,
        skipped: Vec<SkipRecord>,
        elapsed_secs: f64,
    ) -> Self {
        let ranking = metrics.ranking;
        Self {
            descriptor: descriptor.to_string(),
            pooling: no_pooling(),
            config_name,
            scenes: metrics.scenes.iter().map(|s| s.scene.clone()).collect(),
            scene_results: metrics.scenes.iter().map(SceneRecord::from).collect(),
            excluded_scenes: metrics.excluded_scenes.clone(),
            precision: metrics.precision,
            micro_precision: metrics.micro_precision,
            recall: metrics.recall(),
            mean_average_precision: metrics.mean_average_precision(),
            precision_at_1: ranking.and_then(|r| r.precision_at_1()),
            precision_at_5: ranking.and_then(|r| r.precision_at_5()),
            precision_at_10: ranking.and_then(|r| r.precision_at_10()),
            counts: metrics.counts,
            skipped,
            elapsed_secs,
        }
    }

    pub fn with_pooling(mut self, pooling: &str) -> Self {
        self.pooling = pooling.to_string();
        self
    }

    /// Plain-text table for the terminal
    pub fn summary(&self) -> String {
        let opt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.4}", v));
        let mut out = format!(
            "descriptor {} (pooling {}): precision {:.4} (micro {:.4}), recall {}, mAP {}, P@1/5/10 {}/{}/{}\n",
            self.descriptor,
            self.pooling,
            self.precision,
            self.micro_precision,
            opt(self.recall),
            opt(self.mean_average_precision),
            opt(self.precision_at_1),
            opt(self.precision_at_5),
            opt(self.precision_at_10),
        );
        for scene in &self.scene_results {
            out.push_str(&format!(
                "  {:<20} precision {:.4}  pairs {}  excluded {}\n",
                scene.scene, scene.precision, scene.pairs, scene.excluded_pairs
            ));
        }
        if !self.excluded_scenes.is_empty() {
            out.push_str(&format!("  excluded scenes: {}\n", self.excluded_scenes.join(", ")));
        }
        out.push_str(&format!(
            "  {} verified / {} matches / {} queries over {} pairs, {} skipped, {:.2}s\n",
            self.counts.verified,
            self.counts.matches,
            self.counts.queries,
            self.counts.pairs,
            self.skipped.len(),
            self.elapsed_secs
        ));
        out
    }
}

pub trait ResultsSink {
    fn deliver(&mut self, record: &ExperimentRecord) -> CliResult<()>;
}

/// Writes each record as pretty JSON, replacing the previous file
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ResultsSink for JsonFileSink {
    fn deliver(&mut self, record: &ExperimentRecord) -> CliResult<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(record)?)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub records: Vec<ExperimentRecord>,
}

impl ResultsSink for MemorySink {
    fn deliver(&mut self, record: &ExperimentRecord) -> CliResult<()> {
        self.records.push(record.clone());
        Ok(())
    }
}
