use desceval_core::EvalError;

/// Dataset, keypoint and results I/O failures
#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    Io { path: String, message: String },
    Image { path: String, message: String },
    Parse { path: String, line: usize, message: String },
    UnknownScene(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Io { path, message } => write!(f, "I/O error on {}: {}", path, message),
            SourceError::Image { path, message } => write!(f, "Cannot decode image {}: {}", path, message),
            SourceError::Parse { path, line, message } => {
                write!(f, "Parse error in {} line {}: {}", path, line, message)
            }
            SourceError::UnknownScene(scene) => write!(f, "Unknown scene '{}'", scene),
        }
    }
}

impl std::error::Error for SourceError {}

impl SourceError {
    pub fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        SourceError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

pub type SourceResult<T> = Result<T, SourceError>;

#[derive(Debug)]
pub enum CliError {
    Eval(EvalError),
    Source(SourceError),
    ThreadPool(rayon::ThreadPoolBuildError),
    Image(image::ImageError),
    Json(serde_json::Error),
    TomlDe(toml::de::Error),
    TomlSer(toml::ser::Error),
    Io(std::io::Error),
    /// A config loader that reports through a boxed error
    Config(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Eval(e) => write!(f, "Configuration error: {}", e),
            CliError::Source(e) => write!(f, "Data source error: {}", e),
            CliError::ThreadPool(e) => write!(f, "Thread pool error: {}", e),
            CliError::Image(e) => write!(f, "Image error: {}", e),
            CliError::Json(e) => write!(f, "JSON error: {}", e),
            CliError::TomlDe(e) => write!(f, "TOML parse error: {}", e),
            CliError::TomlSer(e) => write!(f, "TOML write error: {}", e),
            CliError::Io(e) => write!(f, "I/O error: {}", e),
            CliError::Config(msg) => write!(f, "Cannot load configuration: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl From<EvalError> for CliError {
    fn from(err: EvalError) -> Self {
        CliError::Eval(err)
    }
}

impl From<SourceError> for CliError {
    fn from(err: SourceError) -> Self {
        CliError::Source(err)
    }
}

impl From<rayon::ThreadPoolBuildError> for CliError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        CliError::ThreadPool(err)
    }
}

impl From<image::ImageError> for CliError {
    fn from(err: image::ImageError) -> Self {
        CliError::Image(err)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Json(err)
    }
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::TomlDe(err)
    }
}

impl From<toml::ser::Error> for CliError {
    fn from(err: toml::ser::Error) -> Self {
        CliError::TomlSer(err)
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io(err)
    }
}

pub type CliResult<T> = Result<T, CliError>;
