use std::path::PathBuf;
use thiserror::Error;

/// ビルドコンテキスト作成時のエラー
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Build context directory not found: {0}")]
    ContextNotFound(PathBuf),

    #[error("Build context is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Dockerfile must be inside the build context: {0}")]
    DockerfileOutsideContext(PathBuf),

    #[error("Invalid pattern '{pattern}' in .dockerignore: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ContextError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ContextError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ContextError>;
