use serde::{Deserialize, Serialize};

use crate::models::Settings;

/// Native library directories. Always skipped, they are restored by the package installer.
pub const LIB_DIRS: &[&str] = &["lib"];
pub const CACHE_DIRS: &[&str] = &["cache", "code_cache"];

/// Ordered list of directory names to skip while walking app data for a backup.
/// Duplicates are allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExclusionSet(Vec<String>);

impl ExclusionSet {
    /// Exclusions for the user's configured backup preferences.
    pub fn from_settings(settings: &Settings) -> Self {
        build_exclusions(settings.exclude_cache_dirs, Some(&settings.extra_excluded_dirs))
    }

    pub fn is_excluded(&self, dir_name: &str) -> bool {
        self.0.iter().any(|d| d == dir_name)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Builds the exclusion list: [`LIB_DIRS`], then [`CACHE_DIRS`] if `include_cache`, then
/// `extra` verbatim.
pub fn build_exclusions(include_cache: bool, extra: Option<&[String]>) -> ExclusionSet {
    let mut dirs: Vec<String> = LIB_DIRS.iter().map(|d| d.to_string()).collect();
    if include_cache {
        dirs.extend(CACHE_DIRS.iter().map(|d| d.to_string()));
    }
    if let Some(extra) = extra {
        dirs.extend(extra.iter().cloned());
    }
    ExclusionSet(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_only() {
        assert_eq!(build_exclusions(false, None).as_slice(), ["lib"]);
    }

    #[test]
    fn base_and_cache() {
        assert_eq!(build_exclusions(true, None).as_slice(), ["lib", "cache", "code_cache"]);
    }

    #[test]
    fn extras_are_appended_in_caller_order() {
        let extra = vec!["x".to_string()];
        assert_eq!(
            build_exclusions(true, Some(&extra)).as_slice(),
            ["lib", "cache", "code_cache", "x"]
        );

        let extra = vec!["z".to_string(), "lib".to_string(), "a".to_string()];
        let set = build_exclusions(false, Some(&extra));
        // no dedup
        assert_eq!(set.as_slice(), ["lib", "z", "lib", "a"]);
        assert!(set.is_excluded("z"));
        assert!(!set.is_excluded("cache"));
    }

    #[test]
    fn from_settings_uses_configured_preferences() {
        let settings = Settings {
            exclude_cache_dirs: false,
            extra_excluded_dirs: vec!["no_backup".into()],
            ..Settings::default()
        };
        assert_eq!(ExclusionSet::from_settings(&settings).into_vec(), ["lib", "no_backup"]);
    }
}
