use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by cache maintenance operations.
///
/// Reads and stores never surface these; they degrade to a miss or a dropped
/// write instead.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("refusing to delete `{path}`: outside cache root `{root}`")]
    OutsideRoot { path: PathBuf, root: PathBuf },
    #[error("cache path `{0}` does not exist")]
    Missing(PathBuf),
    #[error("cache path `{0}` is not a directory")]
    NotADirectory(PathBuf),
    #[error("cache io error at `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
