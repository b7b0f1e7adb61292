use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// IO failure tied to a specific file.
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// IO failure on a stream without a known path.
    #[error("io error: {0}")]
    Stream(#[from] io::Error),

    #[error("invalid footprint collection: {0}")]
    Json(#[from] serde_json::Error),

    /// Tile edge must be finite and strictly positive.
    #[error("tile size must be > 0 (got {0})")]
    InvalidTileSize(f64),

    /// Root extent of the tiler has no finite area to cover.
    #[error("cannot tile an empty extent")]
    EmptyExtent,

    #[error("tile grid of {cols} x {rows} cells is too large; increase the tile size")]
    TooManyTiles { cols: usize, rows: usize },

    /// The building could not be assembled into a document.
    #[error("building {id}: {reason}")]
    Build { id: String, reason: String },
}

impl Error {
    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn build(id: &str, reason: impl Into<String>) -> Self {
        Error::Build {
            id: id.to_owned(),
            reason: reason.into(),
        }
    }
}
