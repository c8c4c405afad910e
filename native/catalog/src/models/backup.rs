use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backup_name::BackupName;

/// A non-reserved directory under the backup root with a valid name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupDirectory {
    pub path: PathBuf,
    pub name: BackupName,
}

impl BackupDirectory {
    /// Directory name as found on disk.
    pub fn dir_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.to_string())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Metadata of a single backup of one application.
///
/// Only `package_name` and `backup_time` matter to the catalog. Other fields are carried
/// through to the index untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub package_name: String,
    /// Milliseconds since Unix epoch
    pub backup_time: i64,
    /// Name of the backup directory this record was loaded from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BackupMetadata {
    pub fn new(package_name: impl Into<String>, backup_time: i64) -> Self {
        Self {
            package_name: package_name.into(),
            backup_time,
            backup_name: None,
            user_id: None,
            label: None,
            version_code: None,
            version_name: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Fills in directory-derived fields the metadata file did not carry itself.
    pub(crate) fn with_directory_defaults(mut self, dir: &BackupDirectory) -> Self {
        if self.backup_name.is_none() {
            self.backup_name = Some(dir.dir_name());
        }
        if self.user_id.is_none() {
            self.user_id = Some(dir.name.user_id());
        }
        if self.label.is_none() {
            self.label = dir.name.label().map(str::to_string);
        }
        self
    }
}

/// Owner of a filesystem path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnershipPair {
    pub uid: u32,
    pub gid: u32,
}

impl OwnershipPair {
    pub fn fallback(uid: u32) -> Self {
        Self { uid, gid: uid }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let json = r#"{
  "package_name": "com.example.app",
  "backup_time": 1700000000000,
  "version_code": 42,
  "flags": ["apk", "data"],
  "crypto": "none"
}"#;
        let meta: BackupMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.package_name, "com.example.app");
        assert_eq!(meta.backup_time, 1_700_000_000_000);
        assert_eq!(meta.version_code, Some(42));
        assert_eq!(meta.extra.get("crypto").and_then(|v| v.as_str()), Some("none"));

        let back = serde_json::to_string(&meta).unwrap();
        let again: BackupMetadata = serde_json::from_str(&back).unwrap();
        assert_eq!(again, meta);
    }

    #[test]
    fn directory_defaults_do_not_override_file_values() {
        let dir = BackupDirectory {
            path: PathBuf::from("/backups/10_weekly"),
            name: BackupName::current(10, "weekly"),
        };
        let mut meta = BackupMetadata::new("com.example.app", 1);
        meta.user_id = Some(0);
        let meta = meta.with_directory_defaults(&dir);
        assert_eq!(meta.user_id, Some(0));
        assert_eq!(meta.backup_name.as_deref(), Some("10_weekly"));
        assert_eq!(meta.label.as_deref(), Some("weekly"));
    }
}
