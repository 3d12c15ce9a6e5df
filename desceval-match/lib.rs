pub mod error;
pub mod ground_truth;
pub mod homography;
pub mod matcher;
pub mod verify;

pub use error::{HomographyError, HomographyResult};
pub use ground_truth::{average_precision, query_rank, GroundTruth};
pub use homography::{estimate_dlt, project, ransac_homography, reprojection_error, try_project, RansacConfig, RansacHomography};
pub use matcher::{distances_from, euclidean_distance, Matcher, SingleCandidatePolicy};
pub use verify::{GeometricVerifier, Verification};
