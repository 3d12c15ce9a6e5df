//! Scoring matches against a known reference-to-target homography.
//!
//! Each query keypoint has at most one relevant target: the target keypoint
//! closest to the query's projection, provided it lies within the tolerance.

use desceval_core::{Correspondence, Descriptor, Keypoint, RankingCounts};
use nalgebra::Matrix3;
use rayon::prelude::*;

use crate::homography::project;
use crate::matcher::{distances_from, euclidean_distance};

#[derive(Debug, Clone)]
pub struct GroundTruth {
    homography: Matrix3<f64>,
    tolerance: f64,
}

impl GroundTruth {
    pub fn new(homography: Matrix3<f64>, tolerance: f64) -> Self {
        Self { homography, tolerance }
    }

    pub fn homography(&self) -> &Matrix3<f64> {
        &self.homography
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Where `kp` lands in the target image
    pub fn project(&self, kp: &Keypoint) -> [f64; 2] {
        project(&self.homography, kp.x as f64, kp.y as f64)
    }

    /// Index of the relevant target for `query`, lowest index on ties
    pub fn relevant_index(&self, query: &Keypoint, targets: &[Keypoint]) -> Option<usize> {
        let [px, py] = self.project(query);
        if !(px.is_finite() && py.is_finite()) {
            return None;
        }
        let mut best: Option<(usize, f64)> = None;
        for (j, t) in targets.iter().enumerate() {
            let d = ((t.x as f64 - px).powi(2) + (t.y as f64 - py).powi(2)).sqrt();
            if d <= self.tolerance && best.map_or(true, |(_, b)| d < b) {
                best = Some((j, d));
            }
        }
        best.map(|(j, _)| j)
    }

    pub fn is_correct(&self, query: &Keypoint, train_idx: usize, targets: &[Keypoint]) -> bool {
        self.relevant_index(query, targets) == Some(train_idx)
    }

    /// Ranking statistics for one image pair.
    ///
    /// Keypoint and descriptor slices must be index-aligned, and `verified`
    /// must index into them.
    pub fn evaluate(
        &self,
        query_keypoints: &[Keypoint],
        query_descriptors: &[Descriptor],
        train_keypoints: &[Keypoint],
        train_descriptors: &[Descriptor],
        verified: &[Correspondence],
    ) -> RankingCounts {
        let mut counts = query_keypoints
            .par_iter()
            .zip(query_descriptors.par_iter())
            .map(|(kp, desc)| {
                let rank = self
                    .relevant_index(kp, train_keypoints)
                    .map(|relevant| query_rank(desc, train_descriptors, relevant));
                let mut counts = RankingCounts::default();
                counts.record_rank(rank);
                counts
            })
            .reduce(RankingCounts::default, RankingCounts::merge);

        counts.correct_verified = verified
            .iter()
            .filter(|c| {
                query_keypoints
                    .get(c.query_idx)
                    .is_some_and(|kp| self.is_correct(kp, c.train_idx, train_keypoints))
            })
            .count();
        counts
    }
}

/// 1-based rank of `relevant` among `train` by distance to `query`.
///
/// Candidates at exactly the relevant distance share the rank:
/// `1 + closer + (tied + 1) / 2`.
pub fn query_rank(query: &[f32], train: &[Descriptor], relevant: usize) -> usize {
    let Some(target) = train.get(relevant) else {
        return usize::MAX;
    };
    let relevant_distance = euclidean_distance(query, target);
    let distances = distances_from(query, train);
    let mut closer = 0;
    let mut tied = 0;
    for (j, &d) in distances.iter().enumerate() {
        if j == relevant {
            continue;
        }
        if d < relevant_distance {
            closer += 1;
        } else if d == relevant_distance {
            tied += 1;
        }
    }
    1 + closer + (tied + 1) / 2
}

/// Average precision of a query whose single relevant item sits at `rank`
pub fn average_precision(rank: usize) -> f64 {
    if rank == 0 { 0.0 } else { 1.0 / rank as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn shift(dx: f64, dy: f64) -> Matrix3<f64> {
        Matrix3::new(1.0, 0.0, dx, 0.0, 1.0, dy, 0.0, 0.0, 1.0)
    }

    #[test]
    fn test_relevant_index_within_tolerance() {
        let gt = GroundTruth::new(shift(10.0, 0.0), 3.0);
        let query = Keypoint::new(5.0, 5.0, 8.0);
        let targets = [
            Keypoint::new(15.0, 9.0, 8.0),
            Keypoint::new(16.0, 6.0, 8.0),
            Keypoint::new(14.0, 5.0, 8.0),
        ];
        assert_eq!(gt.relevant_index(&query, &targets), Some(2));
        assert!(gt.is_correct(&query, 2, &targets));
        assert!(!gt.is_correct(&query, 1, &targets));
        assert_eq!(gt.relevant_index(&query, &targets[..1]), None);
    }

    #[test]
    fn test_query_rank_with_ties() {
        let query = vec![0.0, 0.0];
        let train = vec![vec![1.0, 0.0], vec![0.5, 0.0], vec![0.0, 1.0], vec![2.0, 0.0]];
        // One closer candidate, one tie
        assert_eq!(query_rank(&query, &train, 0), 1 + 1 + 1);
        assert_eq!(query_rank(&query, &train, 1), 1);
        assert_eq!(query_rank(&query, &train, 3), 4);
        assert_relative_eq!(average_precision(4), 0.25);
    }

    #[test]
    fn test_evaluate_identity_pair() {
        let gt = GroundTruth::new(Matrix3::identity(), 3.0);
        let kps: Vec<Keypoint> = (0..5).map(|i| Keypoint::new(i as f32 * 20.0, 10.0, 8.0)).collect();
        let descs: Vec<Descriptor> = (0..5).map(|i| vec![(i as f32).cos(), (i as f32).sin()]).collect();
        let verified = vec![
            Correspondence { query_idx: 0, train_idx: 0, distance: 0.0 },
            Correspondence { query_idx: 2, train_idx: 3, distance: 0.5 },
            Correspondence { query_idx: 4, train_idx: 4, distance: 0.0 },
        ];

        let counts = gt.evaluate(&kps, &descs, &kps, &descs, &verified);
        assert_eq!(counts.relevant_queries, 5);
        assert_eq!(counts.excluded_queries, 0);
        assert_eq!(counts.correct_verified, 2);
        assert_eq!(counts.hits_at_1, 5);
        assert_relative_eq!(counts.mean_average_precision().unwrap(), 1.0);
        assert_relative_eq!(counts.recall().unwrap(), 0.4);
    }

    #[test]
    fn test_queries_projecting_away_are_excluded() {
        let gt = GroundTruth::new(shift(500.0, 0.0), 3.0);
        let kps = vec![Keypoint::new(1.0, 1.0, 8.0), Keypoint::new(50.0, 1.0, 8.0)];
        let descs = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let counts = gt.evaluate(&kps, &descs, &kps, &descs, &[]);
        assert_eq!(counts.relevant_queries, 0);
        assert_eq!(counts.excluded_queries, 2);
        assert_eq!(counts.recall(), None);
    }
}
