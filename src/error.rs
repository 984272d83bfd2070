use thiserror::Error;

/// Failures surfaced by a K-means job. None of them are retried: a failing
/// round stops the job and the error is returned to the caller.
#[derive(Debug, Error)]
pub enum KMeansError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("codec error: {0}")]
    Codec(String),

    /// A sum or mean left the finite range of f64.
    #[error("numeric overflow: {0}")]
    Overflow(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, KMeansError>;

impl KMeansError {
    pub fn config(msg: impl Into<String>) -> Self {
        KMeansError::Config(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        KMeansError::Parse(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        KMeansError::Transport(msg.into())
    }

    pub fn overflow(msg: impl Into<String>) -> Self {
        KMeansError::Overflow(msg.into())
    }
}
