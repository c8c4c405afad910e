use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub backups_location: String,
    /// Where the backup index is persisted
    pub index_location: String,
    /// Skip `cache` and `code_cache` when creating backups
    #[serde(default = "default_true")]
    pub exclude_cache_dirs: bool,
    #[serde(default)]
    pub extra_excluded_dirs: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Settings {
    pub fn backups_location(&self) -> PathBuf {
        PathBuf::from(&self.backups_location)
    }

    pub fn index_location(&self) -> PathBuf {
        PathBuf::from(&self.index_location)
    }
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(std::env::temp_dir).join("AppCatalog");
        Self {
            backups_location: dirs::document_dir()
                .unwrap_or_else(|| data_dir.clone())
                .join("AppCatalog_backups")
                .to_string_lossy()
                .to_string(),
            index_location: data_dir.join("backups_index.json").to_string_lossy().to_string(),
            exclude_cache_dirs: true,
            extra_excluded_dirs: Vec::new(),
        }
    }
}
