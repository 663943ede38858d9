//! Error types for the transform cache

use std::fmt;
use std::time::Duration;

/// Failure reported by an external fetch+transform pipeline
#[derive(Debug)]
pub enum PipelineError {
    /// Source content cannot be transformed (unsupported type, too large)
    Unsupported(String),
    /// Origin unreachable or answered with a non-success status
    Upstream(String),
    /// The transform engine failed while producing output
    Transform(String),
    Io(Box<std::io::Error>),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Unsupported(msg) => write!(f, "Unsupported source: {}", msg),
            PipelineError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
            PipelineError::Transform(msg) => write!(f, "Transform error: {}", msg),
            PipelineError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(Box::new(err))
    }
}

#[derive(Debug)]
pub enum CacheError {
    /// Metadata store unreachable or rejected a command
    Store(String),
    Io(Box<std::io::Error>),
    Pipeline(PipelineError),
    /// Gave up waiting for another worker to finish populating
    LockTimeout { fingerprint: String, waited: Duration },
    /// A spawned populate task panicked or was cancelled
    Task(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Store(msg) => write!(f, "Metadata store error: {}", msg),
            CacheError::Io(err) => write!(f, "IO error: {}", err),
            CacheError::Pipeline(err) => write!(f, "Pipeline error: {}", err),
            CacheError::LockTimeout {
                fingerprint,
                waited,
            } => write!(
                f,
                "Timed out after {:?} waiting for populate of {}",
                waited, fingerprint
            ),
            CacheError::Task(msg) => write!(f, "Populate task failed: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err.as_ref()),
            CacheError::Pipeline(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

impl From<PipelineError> for CacheError {
    fn from(err: PipelineError) -> Self {
        CacheError::Pipeline(err)
    }
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(err: tokio::task::JoinError) -> Self {
        CacheError::Task(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
