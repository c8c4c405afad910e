//! Backup catalog of the app manager.
//!
//! Tracks the backups stored under the backup root for every app and device user, keeps a
//! persistent index of them in sync with the disk and derives the exclusion policy used when
//! creating new backups.

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use tokio_stream::wrappers::WatchStream;
use tracing::info;

pub mod backup_name;
pub mod catalog;
pub mod error;
pub mod exclusions;
pub mod index;
pub mod logging;
pub mod metadata;
pub mod models;
pub mod ownership;
pub mod settings;

pub use backup_name::{BackupName, extract_label, extract_user_id};
pub use catalog::{BackupCatalog, BackupsByPackage, LatestBackups, reduce_latest};
pub use error::CatalogError;
pub use exclusions::{ExclusionSet, build_exclusions};
pub use index::{BackupIndex, JsonBackupIndex};
pub use metadata::{JsonMetadataSource, MetadataSource};
pub use models::{BackupDirectory, BackupMetadata, OwnershipPair, Settings};
pub use ownership::{FsOwnershipQuery, OwnershipQuery, resolve_ownership};
pub use settings::SettingsHandler;

/// Settings and catalog wired together with the default JSON metadata source and index.
pub struct CatalogServices {
    pub settings: Arc<SettingsHandler>,
    pub catalog: Arc<BackupCatalog>,
}

/// Loads settings from `app_dir` and starts a catalog following them.
///
/// The index location is read once here; changing it requires a restart.
pub async fn start(app_dir: PathBuf) -> Result<CatalogServices> {
    start_with_defaults(app_dir, Settings::default()).await
}

/// Like [`start`], with `defaults` used when `app_dir` has no usable settings file.
pub async fn start_with_defaults(app_dir: PathBuf, defaults: Settings) -> Result<CatalogServices> {
    let settings = SettingsHandler::new_with_defaults(app_dir, defaults);
    let index_location = settings.current().index_location();
    info!(index = %index_location.display(), "Starting backup catalog");

    let index = Arc::new(JsonBackupIndex::open(&index_location).await?);
    let catalog = BackupCatalog::start(
        WatchStream::new(settings.subscribe()),
        Arc::new(JsonMetadataSource),
        index,
    )
    .await?;
    Ok(CatalogServices { settings, catalog })
}
