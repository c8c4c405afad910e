use std::{
    error::Error,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use fs_err::tokio as fs;
use futures::stream::{self, StreamExt as _};
use indexmap::IndexMap;
use tokio::sync::{Mutex, RwLock};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    backup_name::BackupName,
    error::CatalogError,
    index::BackupIndex,
    metadata::MetadataSource,
    models::{BackupDirectory, BackupMetadata, Settings},
};

/// Saved logcat output.
pub const SAVED_LOGS_DIR: &str = "saved_logs";
/// Staging area for APKs saved outside of a backup.
pub const APK_SAVING_DIR: &str = "apks";
/// Scratch space used while a backup is being created or restored.
pub const TEMPORARY_DIR: &str = ".tmp";

/// Subdirectories of the backup root that never hold backups.
pub const RESERVED_DIRS: [&str; 3] = [SAVED_LOGS_DIR, APK_SAVING_DIR, TEMPORARY_DIR];

/// Number of backup directories whose metadata is loaded concurrently during a scan.
const SCAN_CONCURRENCY: usize = 8;

/// Every record found on disk, grouped by package in scan order.
pub type BackupsByPackage = IndexMap<String, Vec<BackupMetadata>>;
/// Most recent backup of each package.
pub type LatestBackups = IndexMap<String, BackupMetadata>;

/// Registry of the backups stored under the backup root.
pub struct BackupCatalog {
    root: Arc<RwLock<PathBuf>>,
    metadata_source: Arc<dyn MetadataSource>,
    index: Arc<dyn BackupIndex>,
    /// Serializes operations that rewrite the index
    refresh_lock: Mutex<()>,
}

impl BackupCatalog {
    pub fn new(
        root: impl Into<PathBuf>,
        metadata_source: Arc<dyn MetadataSource>,
        index: Arc<dyn BackupIndex>,
    ) -> Self {
        Self {
            root: Arc::new(RwLock::new(root.into())),
            metadata_source,
            index,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Creates a catalog rooted at the current backups location and keeps following
    /// location changes from `settings_stream`.
    pub async fn start(
        mut settings_stream: WatchStream<Settings>,
        metadata_source: Arc<dyn MetadataSource>,
        index: Arc<dyn BackupIndex>,
    ) -> anyhow::Result<Arc<Self>> {
        let initial_settings = settings_stream
            .next()
            .await
            .context("Settings stream closed on backup catalog init")?;

        let catalog =
            Arc::new(Self::new(initial_settings.backups_location(), metadata_source, index));

        // Watch settings updates
        {
            let root = catalog.root.clone();
            tokio::spawn(async move {
                while let Some(settings) = settings_stream.next().await {
                    let new_root = settings.backups_location();
                    let mut current = root.write().await;
                    if *current != new_root {
                        info!(dir = %new_root.display(), "Backups location updated");
                        *current = new_root;
                    }
                }
                debug!("Settings stream closed, backups location is now fixed");
            });
        }

        Ok(catalog)
    }

    pub async fn backups_location(&self) -> PathBuf {
        self.root.read().await.clone()
    }

    /// Loads the metadata of every backup under the backup root.
    ///
    /// Reserved directories and directories with invalid names are skipped, as are
    /// directories whose metadata cannot be loaded. Only a failure to list the root itself
    /// fails the scan.
    #[instrument(level = "debug", skip(self), err)]
    pub async fn scan_all(&self) -> Result<BackupsByPackage, CatalogError> {
        let root = self.backups_location().await;
        let dirs = list_backup_dirs(&root).await?;
        debug!(root = %root.display(), count = dirs.len(), "Scanning backup directories");

        let source = &self.metadata_source;
        let loaded: Vec<_> = stream::iter(dirs)
            .map(|dir| async move {
                let result = source.load_metadata_records(&dir).await;
                (dir, result)
            })
            .buffered(SCAN_CONCURRENCY)
            .collect()
            .await;

        let mut grouped = BackupsByPackage::new();
        for (dir, result) in loaded {
            match result {
                Ok(records) => {
                    if records.is_empty() {
                        trace!(path = %dir.path.display(), "Backup directory has no metadata");
                    }
                    for record in records {
                        grouped.entry(record.package_name.clone()).or_default().push(record);
                    }
                }
                Err(e) => {
                    let cause = format!("{e:#}");
                    let err = CatalogError::metadata_load_failed(&dir.path, e);
                    warn!(error = &err as &dyn Error, %cause, "Skipping backup directory");
                }
            }
        }
        debug!(packages = grouped.len(), "Finished scanning backups");
        Ok(grouped)
    }

    /// Rescans the backup root, replaces the index with every record found and returns the
    /// latest backup of each package.
    ///
    /// If the scan or the index write fails nothing is returned and the index keeps its
    /// previous contents.
    #[instrument(skip(self), err)]
    pub async fn refresh_and_get_latest(&self) -> Result<LatestBackups, CatalogError> {
        let _guard = self.refresh_lock.lock().await;

        let grouped = self.scan_all().await?;
        let all: Vec<BackupMetadata> = grouped.into_values().flatten().collect();
        let latest = reduce_latest(&all);
        let count = all.len();

        self.index.replace_all(all).await.map_err(CatalogError::index_write_failed)?;
        info!(packages = latest.len(), backups = count, "Backup catalog refreshed");
        Ok(latest)
    }

    /// Latest backup of each package according to the index, without touching the disk.
    #[instrument(level = "debug", skip(self), err)]
    pub async fn latest_from_index(&self) -> Result<LatestBackups, CatalogError> {
        let all = self.index.get_all().await.map_err(CatalogError::index_read_failed)?;
        Ok(reduce_latest(&all))
    }

    /// Rescans the backup root and replaces the index records of `package` only.
    ///
    /// Returns the latest backup of `package`, or `None` if none is left on disk.
    #[instrument(skip(self), err)]
    pub async fn refresh_package(
        &self,
        package: &str,
    ) -> Result<Option<BackupMetadata>, CatalogError> {
        let _guard = self.refresh_lock.lock().await;

        let fresh = self.scan_all().await?.shift_remove(package).unwrap_or_default();
        let latest = reduce_latest(&fresh).shift_remove(package);

        let mut all = self.index.get_all().await.map_err(CatalogError::index_read_failed)?;
        all.retain(|b| b.package_name != package);
        debug!(kept = all.len(), fresh = fresh.len(), "Replacing package records in index");
        all.extend(fresh);

        self.index.replace_all(all).await.map_err(CatalogError::index_write_failed)?;
        Ok(latest)
    }
}

/// Keeps the record with the greatest `backup_time` per package. On equal times the record
/// seen first wins.
pub fn reduce_latest<'a>(records: impl IntoIterator<Item = &'a BackupMetadata>) -> LatestBackups {
    let mut latest = LatestBackups::new();
    for record in records {
        match latest.get_mut(&record.package_name) {
            Some(current) if record.backup_time > current.backup_time => *current = record.clone(),
            Some(_) => {}
            None => {
                latest.insert(record.package_name.clone(), record.clone());
            }
        }
    }
    latest
}

/// Lists backup directories under `root`, sorted by name so that scans are deterministic.
#[instrument(level = "debug", fields(root = %root.display()), err)]
async fn list_backup_dirs(root: &Path) -> Result<Vec<BackupDirectory>, CatalogError> {
    let mut rd = fs::read_dir(root).await.map_err(|e| CatalogError::scan_failed(root, e))?;

    let mut dirs = Vec::new();
    while let Some(entry) =
        rd.next_entry().await.map_err(|e| CatalogError::scan_failed(root, e))?
    {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            warn!(path = %path.display(), "Skipping backup directory with non UTF-8 name");
            continue;
        };
        if RESERVED_DIRS.contains(&name.as_str()) {
            trace!(%name, "Skipping reserved directory");
            continue;
        }
        match entry.file_type().await {
            Ok(t) if t.is_dir() => {}
            Ok(_) => continue,
            Err(e) => {
                debug!(error = &e as &dyn Error, path = %path.display(), "Failed to stat entry");
                continue;
            }
        }
        match BackupName::parse(&name) {
            Ok(parsed) => dirs.push(BackupDirectory { path, name: parsed }),
            Err(e) => {
                warn!(
                    error = &e as &dyn Error,
                    path = %path.display(),
                    "Skipping backup directory"
                );
            }
        }
    }
    dirs.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
    Ok(dirs)
}
