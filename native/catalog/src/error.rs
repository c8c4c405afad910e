use std::path::PathBuf;

use thiserror::Error;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the backup catalog.
///
/// Per-directory metadata failures are logged and skipped by the scanner, ownership query
/// failures never leave the resolver. Everything else fails the calling operation as a whole.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Directory name matches neither the legacy (`<digits>`) nor the current
    /// (`<digits>_<label>`) naming scheme.
    #[error("Invalid backup name: '{0}'")]
    InvalidBackupName(String),

    #[error("Failed to scan backups directory {}", .path.display())]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("Failed to load backup metadata from {}", .path.display())]
    MetadataLoadFailed {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("Failed to read backup index")]
    IndexReadFailed(#[source] BoxError),

    /// The index could not be replaced. Its previous contents are left untouched.
    #[error("Failed to replace backup index contents")]
    IndexWriteFailed(#[source] BoxError),
}

impl CatalogError {
    pub(crate) fn scan_failed(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        Self::ScanFailed { path: path.into(), source: source.into() }
    }

    pub(crate) fn metadata_load_failed(
        path: impl Into<PathBuf>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::MetadataLoadFailed { path: path.into(), source: source.into() }
    }

    pub(crate) fn index_write_failed(source: impl Into<BoxError>) -> Self {
        Self::IndexWriteFailed(source.into())
    }

    pub(crate) fn index_read_failed(source: impl Into<BoxError>) -> Self {
        Self::IndexReadFailed(source.into())
    }
}
