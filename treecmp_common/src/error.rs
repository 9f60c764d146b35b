use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompareError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error at {path}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Hash error for {path}: {source}")]
    Hash {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path error: {0}")]
    Path(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CompareError {
    /// Attach the offending path to an I/O failure
    pub fn io_at(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        CompareError::IoAt {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn hash(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        CompareError::Hash {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn archive(path: impl AsRef<Path>, message: impl std::fmt::Display) -> Self {
        CompareError::Archive(format!("{}: {}", path.as_ref().display(), message))
    }
}

pub type Result<T> = std::result::Result<T, CompareError>;
