#[derive(Debug, Clone, PartialEq)]
pub enum HomographyError {
    TooFewPoints { needed: usize, got: usize },
    LengthMismatch { src: usize, dst: usize },
    /// Three or more sample points are collinear
    DegenerateConfiguration,
    NumericalFailure(String),
    /// No sample produced a model with enough support
    NoConsensus,
}

impl std::fmt::Display for HomographyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HomographyError::TooFewPoints { needed, got } => {
                write!(f, "Too few points: need {}, got {}", needed, got)
            }
            HomographyError::LengthMismatch { src, dst } => {
                write!(f, "Point set length mismatch: {} source, {} destination", src, dst)
            }
            HomographyError::DegenerateConfiguration => write!(f, "Degenerate point configuration"),
            HomographyError::NumericalFailure(msg) => write!(f, "Numerical failure: {}", msg),
            HomographyError::NoConsensus => write!(f, "RANSAC found no consistent model"),
        }
    }
}

impl std::error::Error for HomographyError {}

pub type HomographyResult<T> = Result<T, HomographyError>;
