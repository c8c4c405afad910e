use anyhow::{Context, Result};
use async_trait::async_trait;
use fs_err::tokio as fs;
use tracing::{debug, instrument, trace};

use crate::models::{BackupDirectory, BackupMetadata};

/// Suffix of metadata files inside a backup directory. Each file holds one record.
pub const METADATA_FILE_SUFFIX: &str = ".am.json";

/// Loads the metadata records stored in a backup directory.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Returns every record found in `dir`. An empty directory yields no records.
    async fn load_metadata_records(&self, dir: &BackupDirectory) -> Result<Vec<BackupMetadata>>;
}

/// Reads `*.am.json` files directly inside the backup directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMetadataSource;

#[async_trait]
impl MetadataSource for JsonMetadataSource {
    #[instrument(level = "debug", skip(self), fields(dir = %dir.path.display()), err)]
    async fn load_metadata_records(&self, dir: &BackupDirectory) -> Result<Vec<BackupMetadata>> {
        let mut files = Vec::new();
        let mut rd = fs::read_dir(&dir.path).await?;
        while let Some(entry) = rd.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(METADATA_FILE_SUFFIX) && entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();

        let mut records = Vec::with_capacity(files.len());
        for path in files {
            let content = fs::read_to_string(&path).await?;
            let meta: BackupMetadata = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            trace!(package = %meta.package_name, backup_time = meta.backup_time, "Loaded record");
            records.push(meta.with_directory_defaults(dir));
        }
        debug!(count = records.len(), "Loaded backup metadata");
        Ok(records)
    }
}
