//! Precision/recall aggregation across image pairs, scenes and experiments.
//!
//! Every stage produces an immutable partial value; partial values combine
//! through associative `merge` functions so results can be reduced in any
//! order (e.g. by `rayon::iter::ParallelIterator::reduce`).
//!
//! Exclusion rules:
//! - a pair with zero queries is left out of its scene's mean,
//! - a scene with zero counted pairs is left out of the experiment's mean.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Raw counters kept next to the derived precision values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RawCounts {
    /// Geometrically verified correspondences
    pub verified: usize,
    /// Correspondences that passed the ratio test
    pub matches: usize,
    /// Reference keypoints that produced a descriptor
    pub queries: usize,
    /// Counted image pairs
    pub pairs: usize,
}

impl RawCounts {
    pub fn merge(self, other: Self) -> Self {
        Self {
            verified: self.verified + other.verified,
            matches: self.matches + other.matches,
            queries: self.queries + other.queries,
            pairs: self.pairs + other.pairs,
        }
    }

    /// Pooled precision: all verified correspondences over all queries
    pub fn micro_precision(&self) -> f64 {
        ratio(self.verified, self.queries)
    }

    /// Fraction of ratio-test survivors that were verified
    pub fn inlier_ratio(&self) -> f64 {
        ratio(self.verified, self.matches)
    }
}

/// Ground-truth statistics: each query has at most one relevant target,
/// the target keypoint closest to its projection within tolerance.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RankingCounts {
    /// Verified correspondences that land on the query's relevant target
    pub correct_verified: usize,
    /// Queries with a relevant target
    pub relevant_queries: usize,
    /// Queries without one (projection missed every target keypoint)
    pub excluded_queries: usize,
    /// Sum of per-query average precision (1 / rank of the relevant target)
    pub ap_sum: f64,
    pub hits_at_1: usize,
    pub hits_at_5: usize,
    pub hits_at_10: usize,
}

impl RankingCounts {
    /// Record the 1-based rank of a query's relevant target, `None` if it has none
    pub fn record_rank(&mut self, rank: Option<usize>) {
        match rank {
            Some(rank) if rank >= 1 => {
                self.relevant_queries += 1;
                self.ap_sum += 1.0 / rank as f64;
                if rank <= 1 {
                    self.hits_at_1 += 1;
                }
                if rank <= 5 {
                    self.hits_at_5 += 1;
                }
                if rank <= 10 {
                    self.hits_at_10 += 1;
                }
            }
            _ => self.excluded_queries += 1,
        }
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            correct_verified: self.correct_verified + other.correct_verified,
            relevant_queries: self.relevant_queries + other.relevant_queries,
            excluded_queries: self.excluded_queries + other.excluded_queries,
            ap_sum: self.ap_sum + other.ap_sum,
            hits_at_1: self.hits_at_1 + other.hits_at_1,
            hits_at_5: self.hits_at_5 + other.hits_at_5,
            hits_at_10: self.hits_at_10 + other.hits_at_10,
        }
    }

    /// Correct verified correspondences over queries that could be matched
    pub fn recall(&self) -> Option<f64> {
        self.over_relevant(self.correct_verified)
    }

    /// Mean of per-query average precision over queries with a relevant target
    pub fn mean_average_precision(&self) -> Option<f64> {
        (self.relevant_queries > 0).then(|| self.ap_sum / self.relevant_queries as f64)
    }

    /// Same, but queries without a relevant target count as zero
    pub fn mean_average_precision_including_excluded(&self) -> Option<f64> {
        let total = self.relevant_queries + self.excluded_queries;
        (total > 0).then(|| self.ap_sum / total as f64)
    }

    pub fn precision_at_1(&self) -> Option<f64> {
        self.over_relevant(self.hits_at_1)
    }

    pub fn precision_at_5(&self) -> Option<f64> {
        self.over_relevant(self.hits_at_5)
    }

    pub fn precision_at_10(&self) -> Option<f64> {
        self.over_relevant(self.hits_at_10)
    }

    fn over_relevant(&self, count: usize) -> Option<f64> {
        (self.relevant_queries > 0).then(|| ratio(count, self.relevant_queries))
    }
}

fn merge_ranking(a: Option<RankingCounts>, b: Option<RankingCounts>) -> Option<RankingCounts> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.merge(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den > 0 { num as f64 / den as f64 } else { 0.0 }
}

/// Outcome of one reference/target image pair
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PairMetrics {
    pub verified_count: usize,
    pub total_matches: usize,
    pub total_queries: usize,
    /// verified_count / total_queries, 0.0 without queries
    pub precision: f64,
    pub ranking: Option<RankingCounts>,
}

/// Per-pair precision. `total_matches` starts equal to the verified count;
/// use [`PairMetrics::with_total_matches`] when the ratio-test count is known.
pub fn record_pair(verified_count: usize, total_queries: usize) -> PairMetrics {
    PairMetrics {
        verified_count,
        total_matches: verified_count,
        total_queries,
        precision: ratio(verified_count, total_queries),
        ranking: None,
    }
}

impl PairMetrics {
    pub fn with_total_matches(mut self, total_matches: usize) -> Self {
        self.total_matches = total_matches;
        self
    }

    pub fn with_ranking(mut self, ranking: RankingCounts) -> Self {
        self.ranking = Some(ranking);
        self
    }

    /// Pairs without queries do not enter scene means
    pub fn is_counted(&self) -> bool {
        self.total_queries > 0
    }
}

/// Partial scene statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneAccumulator {
    precision_sum: f64,
    counted_pairs: usize,
    excluded_pairs: usize,
    counts: RawCounts,
    ranking: Option<RankingCounts>,
}

impl SceneAccumulator {
    pub fn from_pair(pair: &PairMetrics) -> Self {
        let mut acc = Self::default();
        acc.push(pair);
        acc
    }

    pub fn push(&mut self, pair: &PairMetrics) {
        if !pair.is_counted() {
            self.excluded_pairs += 1;
            return;
        }
        self.precision_sum += pair.precision;
        self.counted_pairs += 1;
        self.counts = self.counts.merge(RawCounts {
            verified: pair.verified_count,
            matches: pair.total_matches,
            queries: pair.total_queries,
            pairs: 1,
        });
        self.ranking = merge_ranking(self.ranking, pair.ranking);
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            precision_sum: self.precision_sum + other.precision_sum,
            counted_pairs: self.counted_pairs + other.counted_pairs,
            excluded_pairs: self.excluded_pairs + other.excluded_pairs,
            counts: self.counts.merge(other.counts),
            ranking: merge_ranking(self.ranking, other.ranking),
        }
    }

    pub fn counted_pairs(&self) -> usize {
        self.counted_pairs
    }

    pub fn finish(self, scene: impl Into<String>) -> SceneMetrics {
        let precision = if self.counted_pairs > 0 {
            self.precision_sum / self.counted_pairs as f64
        } else {
            0.0
        };
        SceneMetrics {
            scene: scene.into(),
            precision,
            pair_count: self.counted_pairs,
            excluded_pairs: self.excluded_pairs,
            counts: self.counts,
            ranking: self.ranking,
        }
    }
}

/// Finalized statistics of one scene
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SceneMetrics {
    pub scene: String,
    /// Unweighted mean of counted pair precisions
    pub precision: f64,
    pub pair_count: usize,
    pub excluded_pairs: usize,
    pub counts: RawCounts,
    pub ranking: Option<RankingCounts>,
}

impl SceneMetrics {
    pub fn has_results(&self) -> bool {
        self.pair_count > 0
    }

    pub fn recall(&self) -> Option<f64> {
        self.ranking.and_then(|r| r.recall())
    }

    pub fn mean_average_precision(&self) -> Option<f64> {
        self.ranking.and_then(|r| r.mean_average_precision())
    }
}

/// Fold all pair results of a scene
pub fn fold_scene(scene: &str, pairs: &[PairMetrics]) -> SceneMetrics {
    pairs
        .iter()
        .fold(SceneAccumulator::default(), |mut acc, pair| {
            acc.push(pair);
            acc
        })
        .finish(scene)
}

/// Partial experiment statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperimentAccumulator {
    precision_sum: f64,
    counts: RawCounts,
    ranking: Option<RankingCounts>,
    scenes: Vec<SceneMetrics>,
    excluded_scenes: Vec<String>,
}

impl ExperimentAccumulator {
    pub fn from_scene(scene: SceneMetrics) -> Self {
        let mut acc = Self::default();
        acc.push(scene);
        acc
    }

    pub fn push(&mut self, scene: SceneMetrics) {
        if !scene.has_results() {
            self.excluded_scenes.push(scene.scene);
            return;
        }
        self.precision_sum += scene.precision;
        self.counts = self.counts.merge(scene.counts);
        self.ranking = merge_ranking(self.ranking, scene.ranking);
        self.scenes.push(scene);
    }

    pub fn merge(mut self, other: Self) -> Self {
        self.precision_sum += other.precision_sum;
        self.counts = self.counts.merge(other.counts);
        self.ranking = merge_ranking(self.ranking, other.ranking);
        self.scenes.extend(other.scenes);
        self.excluded_scenes.extend(other.excluded_scenes);
        self
    }

    pub fn finish(mut self) -> AggregateMetrics {
        self.scenes.sort_by(|a, b| a.scene.cmp(&b.scene));
        self.excluded_scenes.sort();
        let scene_count = self.scenes.len();
        let precision = if scene_count > 0 {
            self.precision_sum / scene_count as f64
        } else {
            0.0
        };
        AggregateMetrics {
            precision,
            micro_precision: self.counts.micro_precision(),
            scene_count,
            scenes: self.scenes,
            excluded_scenes: self.excluded_scenes,
            counts: self.counts,
            ranking: self.ranking,
        }
    }
}

/// Finalized statistics of one experiment run
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AggregateMetrics {
    /// Unweighted mean of scene precisions over scenes with results
    pub precision: f64,
    /// Pooled verified / queries over every counted pair
    pub micro_precision: f64,
    pub scene_count: usize,
    /// Counted scenes, sorted by name
    pub scenes: Vec<SceneMetrics>,
    pub excluded_scenes: Vec<String>,
    pub counts: RawCounts,
    pub ranking: Option<RankingCounts>,
}

impl AggregateMetrics {
    pub fn scene_precision(&self, scene: &str) -> Option<f64> {
        self.scenes.iter().find(|s| s.scene == scene).map(|s| s.precision)
    }

    pub fn scene_names(&self) -> Vec<&str> {
        self.scenes.iter().map(|s| s.scene.as_str()).collect()
    }

    pub fn recall(&self) -> Option<f64> {
        self.ranking.and_then(|r| r.recall())
    }

    pub fn mean_average_precision(&self) -> Option<f64> {
        self.ranking.and_then(|r| r.mean_average_precision())
    }
}

/// Fold scene results into experiment statistics
pub fn fold_experiment(scenes: &[SceneMetrics]) -> AggregateMetrics {
    scenes
        .iter()
        .cloned()
        .fold(ExperimentAccumulator::default(), |mut acc, scene| {
            acc.push(scene);
            acc
        })
        .finish()
}
