use desceval_core::{Correspondence, Descriptor, EvalResult, MatchConfig};
use rayon::prelude::*;

/// What to do when the target set holds a single descriptor and the ratio
/// test has no second-nearest distance to compare against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SingleCandidatePolicy {
    #[default]
    Reject,
    Accept,
}

/// Brute-force nearest-neighbour matcher with Lowe's ratio test
#[derive(Debug, Clone)]
pub struct Matcher {
    ratio_threshold: f32,
    single_candidate: SingleCandidatePolicy,
    cross_check: bool,
}

/// Nearest and second-nearest train descriptors for one query
#[derive(Debug, Clone, Copy, PartialEq)]
struct Neighbours {
    best_idx: usize,
    best: f32,
    second: Option<f32>,
}

impl Matcher {
    pub fn new(ratio_threshold: f32) -> EvalResult<Self> {
        Self::from_config(&MatchConfig {
            ratio_threshold,
            ..MatchConfig::default()
        })
    }

    pub fn from_config(cfg: &MatchConfig) -> EvalResult<Self> {
        cfg.validate()?;
        Ok(Self {
            ratio_threshold: cfg.ratio_threshold,
            single_candidate: if cfg.accept_single_candidate {
                SingleCandidatePolicy::Accept
            } else {
                SingleCandidatePolicy::Reject
            },
            cross_check: cfg.cross_check,
        })
    }

    pub fn with_single_candidate(mut self, policy: SingleCandidatePolicy) -> Self {
        self.single_candidate = policy;
        self
    }

    pub fn with_cross_check(mut self, cross_check: bool) -> Self {
        self.cross_check = cross_check;
        self
    }

    pub fn ratio_threshold(&self) -> f32 {
        self.ratio_threshold
    }

    /// Match every query descriptor against all train descriptors.
    ///
    /// Output is sorted by query index with at most one entry per query.
    /// Empty inputs give an empty result.
    pub fn match_descriptors(&self, query: &[Descriptor], train: &[Descriptor]) -> Vec<Correspondence> {
        if query.is_empty() || train.is_empty() {
            return Vec::new();
        }

        let mut matches: Vec<Correspondence> = query
            .par_iter()
            .enumerate()
            .filter_map(|(query_idx, q)| {
                let nn = nearest_two(q, train)?;
                self.accepts(&nn).then_some(Correspondence {
                    query_idx,
                    train_idx: nn.best_idx,
                    distance: nn.best,
                })
            })
            .collect();

        if self.cross_check {
            let reverse: Vec<Option<usize>> = train
                .par_iter()
                .map(|t| nearest_two(t, query).map(|nn| nn.best_idx))
                .collect();
            matches.retain(|m| reverse[m.train_idx] == Some(m.query_idx));
        }
        matches
    }

    fn accepts(&self, nn: &Neighbours) -> bool {
        match nn.second {
            // A zero or undefined second distance makes the ratio meaningless
            Some(second) if second > 0.0 && second.is_finite() => nn.best / second < self.ratio_threshold,
            Some(_) => false,
            None => self.single_candidate == SingleCandidatePolicy::Accept,
        }
    }
}

/// Euclidean (L2) distance over the common prefix of two descriptors
#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

/// Distances from one query descriptor to every train descriptor
pub fn distances_from(query: &[f32], train: &[Descriptor]) -> Vec<f32> {
    train.iter().map(|t| euclidean_distance(query, t)).collect()
}

/// Lowest-index nearest neighbour and the second-nearest distance.
/// NaN distances are never selected.
fn nearest_two(query: &[f32], train: &[Descriptor]) -> Option<Neighbours> {
    let mut best: Option<(usize, f32)> = None;
    let mut second: Option<f32> = None;
    for (j, t) in train.iter().enumerate() {
        let d = euclidean_distance(query, t);
        if d.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if d >= b => {
                if second.map_or(true, |s| d < s) {
                    second = Some(d);
                }
            }
            _ => {
                second = best.map(|(_, b)| b).or(second);
                best = Some((j, d));
            }
        }
    }
    best.map(|(best_idx, best)| Neighbours {
        best_idx,
        best,
        second,
    })
}
