//! Error types for the image cache

use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum CacheError {
    Io(Box<std::io::Error>),
    InvalidKey(String),
    InvalidFormat(String),
    InvalidRoot(PathBuf),
    Task(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(err) => write!(f, "IO error: {}", err),
            CacheError::InvalidKey(key) => write!(f, "Invalid cache key: {}", key),
            CacheError::InvalidFormat(format) => write!(f, "Invalid image format: {}", format),
            CacheError::InvalidRoot(path) => {
                write!(f, "Cache root is not a directory: {}", path.display())
            }
            CacheError::Task(msg) => write!(f, "Background task failed: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(err: tokio::task::JoinError) -> Self {
        CacheError::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
