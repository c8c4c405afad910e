use std::{fmt, str::FromStr};

use lazy_regex::regex_captures;

use crate::error::CatalogError;

/// Name of a backup directory under the backup root.
///
/// Two generations of naming coexist on disk:
/// - legacy: `<user_id>` (digits only, no label)
/// - current: `<user_id>_<label>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BackupName {
    Legacy { user_id: u32 },
    Current { user_id: u32, label: String },
}

impl BackupName {
    /// Parses a directory name.
    ///
    /// The digits-only check runs first, so `"10_20"` is a current-scheme name with label
    /// `"20"` while `"1020"` is always a legacy name.
    pub fn parse(name: &str) -> Result<Self, CatalogError> {
        let invalid = || CatalogError::InvalidBackupName(name.to_string());

        if is_digits_only(name) {
            let user_id = name.parse().map_err(|_| invalid())?;
            return Ok(Self::Legacy { user_id });
        }

        let (_, user_id, label) =
            regex_captures!(r"(?s)^([0-9]+)_(.*)$", name).ok_or_else(invalid)?;
        let user_id = user_id.parse().map_err(|_| invalid())?;
        Ok(Self::Current { user_id, label: label.to_string() })
    }

    /// Builds a current-scheme name. The label is sanitized so it can be used as a single
    /// path component.
    pub fn current(user_id: u32, label: &str) -> Self {
        Self::Current { user_id, label: sanitize_filename::sanitize(label) }
    }

    pub fn user_id(&self) -> u32 {
        match self {
            Self::Legacy { user_id } | Self::Current { user_id, .. } => *user_id,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Legacy { .. } => None,
            Self::Current { label, .. } => Some(label),
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy { .. })
    }
}

impl fmt::Display for BackupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy { user_id } => write!(f, "{user_id}"),
            Self::Current { user_id, label } => write!(f, "{user_id}_{label}"),
        }
    }
}

impl FromStr for BackupName {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Returns the label of a backup directory name, or `None` for a legacy name.
pub fn extract_label(name: &str) -> Result<Option<String>, CatalogError> {
    Ok(BackupName::parse(name)?.label().map(str::to_string))
}

/// Returns the device-user id a backup directory belongs to.
pub fn extract_user_id(name: &str) -> Result<u32, CatalogError> {
    Ok(BackupName::parse(name)?.user_id())
}

fn is_digits_only(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
