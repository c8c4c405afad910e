use std::{
    error::Error,
    io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use fs_err::tokio::{self as fs, File, OpenOptions};
use fs4::fs_err3_tokio::AsyncFileExt as _;
use serde::{Deserialize, Serialize};
use tokio::{
    io::AsyncWriteExt,
    sync::RwLock,
    time::{Duration, sleep},
};
use tracing::{debug, info, instrument, trace, warn};

use crate::models::BackupMetadata;

const INDEX_FORMAT_VERSION: u32 = 1;
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Persistent store of every known backup record.
///
/// Implementations must make [`BackupIndex::replace_all`] atomic: readers observe either the
/// old or the new contents, never an empty index in between, and a failed replacement
/// leaves the old contents in place.
#[async_trait]
pub trait BackupIndex: Send + Sync {
    async fn get_all(&self) -> Result<Vec<BackupMetadata>>;

    async fn insert(&self, backups: Vec<BackupMetadata>) -> Result<()>;

    async fn delete_all(&self) -> Result<()> {
        self.replace_all(Vec::new()).await
    }

    /// Deletes every record and inserts `backups` as one step.
    async fn replace_all(&self, backups: Vec<BackupMetadata>) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    #[serde(default)]
    format_version: u32,
    backups: Vec<BackupMetadata>,
}

/// Index persisted as a single JSON file.
///
/// Records are cached in memory behind a reader/writer lock. Every write takes the
/// `<index>.lock` file lock, so several handles (or processes) can share one index file:
/// `insert` re-reads the file under that lock and appends to what is on disk, and the new
/// contents are staged in a temporary file that is renamed over the index.
#[derive(Debug)]
pub struct JsonBackupIndex {
    path: PathBuf,
    records: RwLock<Vec<BackupMetadata>>,
}

impl JsonBackupIndex {
    /// Opens the index at `path`. A missing file is an empty index; an unreadable one is
    /// logged and treated as empty, the next refresh rebuilds it.
    #[instrument(level = "debug", skip(path), fields(path = %path.as_ref().display()), err)]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match read_index_file(&path).await {
            Ok(Some(backups)) => backups,
            Ok(None) => {
                debug!("Backup index file doesn't exist, starting empty");
                Vec::new()
            }
            Err(e) => {
                warn!(
                    error = e.as_ref() as &dyn Error,
                    path = %path.display(),
                    "Unreadable backup index, starting with empty index"
                );
                Vec::new()
            }
        };
        Ok(Self { path, records: RwLock::new(records) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `backups` to a temp file and renames it over the index file.
    ///
    /// Callers must hold the index file lock.
    #[instrument(level = "debug", skip(self, _lock, backups), fields(count = backups.len()), err)]
    async fn persist(&self, _lock: &IndexFileLock, backups: &[BackupMetadata]) -> Result<()> {
        #[derive(Serialize)]
        struct IndexFileRef<'a> {
            format_version: u32,
            backups: &'a [BackupMetadata],
        }
        let json = serde_json::to_string_pretty(&IndexFileRef {
            format_version: INDEX_FORMAT_VERSION,
            backups,
        })?;

        let tmp = self.path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        let staged = async {
            let mut file = File::create(&tmp).await?;
            file.write_all(json.as_bytes()).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp, &self.path)
                .await
                .with_context(|| format!("Failed to replace {}", self.path.display()))
        }
        .await;
        if staged.is_err() {
            let _ = fs::remove_file(&tmp).await;
        }
        staged
    }
}

#[async_trait]
impl BackupIndex for JsonBackupIndex {
    async fn get_all(&self) -> Result<Vec<BackupMetadata>> {
        Ok(self.records.read().await.clone())
    }

    #[instrument(level = "debug", skip(self, backups), fields(count = backups.len()), err)]
    async fn insert(&self, backups: Vec<BackupMetadata>) -> Result<()> {
        let mut records = self.records.write().await;
        let lock = IndexFileLock::acquire(&self.path).await?;

        // Another handle may have written since this one last did
        let mut updated = match read_index_file(&self.path).await {
            Ok(on_disk) => on_disk.unwrap_or_default(),
            Err(e) => {
                warn!(
                    error = e.as_ref() as &dyn Error,
                    "Unreadable backup index, appending to cached records"
                );
                records.clone()
            }
        };
        updated.extend(backups);
        self.persist(&lock, &updated).await?;
        *records = updated;
        Ok(())
    }

    #[instrument(level = "debug", skip(self, backups), fields(count = backups.len()), err)]
    async fn replace_all(&self, backups: Vec<BackupMetadata>) -> Result<()> {
        let mut records = self.records.write().await;
        let lock = IndexFileLock::acquire(&self.path).await?;
        self.persist(&lock, &backups).await?;
        info!(path = %self.path.display(), count = backups.len(), "Replaced backup index");
        *records = backups;
        Ok(())
    }
}

/// Reads the records stored at `path`, `None` if there is no index file yet.
async fn read_index_file(path: &Path) -> Result<Option<Vec<BackupMetadata>>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let file: IndexFile = serde_json::from_str(&content)
        .with_context(|| format!("Invalid backup index {}", path.display()))?;
    debug!(count = file.backups.len(), version = file.format_version, "Read backup index");
    Ok(Some(file.backups))
}

/// Exclusive lock on `<index>.lock` serializing writers of one index file, released on drop.
struct IndexFileLock(File);

impl IndexFileLock {
    async fn acquire(index_path: &Path) -> Result<Self> {
        if let Some(parent) = index_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(index_path.with_extension("lock"))
            .await?;
        while !file.try_lock_exclusive()? {
            trace!("Backup index is locked by another writer, waiting");
            sleep(LOCK_RETRY_INTERVAL).await;
        }
        Ok(Self(file))
    }
}

impl Drop for IndexFileLock {
    fn drop(&mut self) {
        let _ = self.0.unlock();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use super::*;

    fn record(pkg: &str, t: i64) -> BackupMetadata {
        BackupMetadata::new(pkg, t)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn replace_all_persists_and_reopens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.json");

        let index = JsonBackupIndex::open(&path).await.unwrap();
        assert!(index.get_all().await.unwrap().is_empty());

        index.replace_all(vec![record("com.a", 1), record("com.b", 2)]).await.unwrap();
        index.replace_all(vec![record("com.c", 3)]).await.unwrap();
        assert_eq!(index.get_all().await.unwrap(), vec![record("com.c", 3)]);

        let reopened = JsonBackupIndex::open(&path).await.unwrap();
        assert_eq!(reopened.get_all().await.unwrap(), vec![record("com.c", 3)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn insert_appends_and_delete_all_clears() {
        let dir = tempdir().unwrap();
        let index = JsonBackupIndex::open(dir.path().join("index.json")).await.unwrap();

        index.insert(vec![record("com.a", 1)]).await.unwrap();
        index.insert(vec![record("com.a", 2)]).await.unwrap();
        assert_eq!(index.get_all().await.unwrap().len(), 2);

        index.delete_all().await.unwrap();
        assert!(index.get_all().await.unwrap().is_empty());
        let reopened = JsonBackupIndex::open(index.path()).await.unwrap();
        assert!(reopened.get_all().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_replace_keeps_previous_contents() {
        let dir = tempdir().unwrap();
        let parent = dir.path().join("db");
        let index = JsonBackupIndex::open(parent.join("index.json")).await.unwrap();
        index.replace_all(vec![record("com.a", 1)]).await.unwrap();

        // Turn the parent directory into a file so the staged write cannot happen
        std::fs::remove_dir_all(&parent).unwrap();
        std::fs::write(&parent, "blocker").unwrap();

        assert!(index.replace_all(vec![record("com.b", 2)]).await.is_err());
        assert_eq!(index.get_all().await.unwrap(), vec![record("com.a", 1)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn corrupt_index_file_opens_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, "[[[").unwrap();
        let index = JsonBackupIndex::open(&path).await.unwrap();
        assert!(index.get_all().await.unwrap().is_empty());
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn unreadable_index_file_opens_empty_and_is_rebuilt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        let index = JsonBackupIndex::open(&path).await.unwrap();
        assert!(index.get_all().await.unwrap().is_empty());

        index.replace_all(vec![record("com.a", 1)]).await.unwrap();
        let reopened = JsonBackupIndex::open(&path).await.unwrap();
        assert_eq!(reopened.get_all().await.unwrap(), vec![record("com.a", 1)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn index_path_that_is_a_directory_opens_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::create_dir(&path).unwrap();
        let index = JsonBackupIndex::open(&path).await.unwrap();
        assert!(index.get_all().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn insert_keeps_records_written_by_another_handle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.json");
        let first = JsonBackupIndex::open(&path).await.unwrap();
        let second = JsonBackupIndex::open(&path).await.unwrap();

        first.replace_all(vec![record("com.a", 1)]).await.unwrap();
        second.insert(vec![record("com.b", 2)]).await.unwrap();

        let expected = vec![record("com.a", 1), record("com.b", 2)];
        assert_eq!(second.get_all().await.unwrap(), expected);
        let reopened = JsonBackupIndex::open(&path).await.unwrap();
        assert_eq!(reopened.get_all().await.unwrap(), expected);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_inserts_from_two_handles_are_all_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.json");
        let first = Arc::new(JsonBackupIndex::open(&path).await.unwrap());
        let second = Arc::new(JsonBackupIndex::open(&path).await.unwrap());

        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let index = if i % 2 == 0 { first.clone() } else { second.clone() };
                tokio::spawn(async move { index.insert(vec![record("com.a", i)]).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let reopened = JsonBackupIndex::open(&path).await.unwrap();
        let mut times: Vec<_> =
            reopened.get_all().await.unwrap().iter().map(|b| b.backup_time).collect();
        times.sort_unstable();
        assert_eq!(times, (0..10).collect::<Vec<_>>());
    }
}
