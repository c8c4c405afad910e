use std::{
    error::Error,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use fs_err as fs;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::models::Settings;

/// Loads, saves and broadcasts catalog settings
#[derive(Debug)]
pub struct SettingsHandler {
    settings_file_path: PathBuf,
    defaults: Settings,
    watch_tx: watch::Sender<Settings>,
}

impl SettingsHandler {
    pub fn new(app_dir: PathBuf) -> Arc<Self> {
        Self::new_with_defaults(app_dir, Settings::default())
    }

    /// Loads `settings.json` from `app_dir`, falling back to `defaults` if it is missing or
    /// unreadable.
    #[instrument(skip(app_dir, defaults))]
    pub fn new_with_defaults(app_dir: PathBuf, defaults: Settings) -> Arc<Self> {
        let watch_tx = watch::Sender::<Settings>::new(defaults.clone());
        let settings_file_path = app_dir.join("settings.json");
        let handler = Arc::new(Self { settings_file_path, defaults, watch_tx });

        let settings = match handler.load_settings() {
            Ok(s) => s,
            Err(e) => {
                warn!(error = e.as_ref() as &dyn Error, "Failed to load settings, using defaults");
                handler.load_default_settings().unwrap_or_else(|e| {
                    error!(error = e.as_ref() as &dyn Error, "Failed to save default settings");
                    handler.defaults.clone()
                })
            }
        };
        handler.on_settings_change(settings);
        handler
    }

    /// Create a receiver for settings changes
    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.watch_tx.subscribe()
    }

    pub fn current(&self) -> Settings {
        self.watch_tx.borrow().clone()
    }

    /// Saves `settings` and notifies subscribers. Nothing is broadcast if saving fails.
    pub fn update(&self, settings: Settings) -> Result<()> {
        self.save_settings(&settings)?;
        self.on_settings_change(settings);
        Ok(())
    }

    /// Re-reads the settings file, e.g. after it was edited externally.
    pub fn reload(&self) -> Result<()> {
        let settings = self.load_settings()?;
        self.on_settings_change(settings);
        Ok(())
    }

    #[instrument(skip(self, settings))]
    fn on_settings_change(&self, settings: Settings) {
        self.watch_tx.send_if_modified(|s| {
            if s != &settings {
                debug!(settings = ?settings, "Active settings changed");
                *s = settings;
                true
            } else {
                trace!("Settings unchanged, not notifying");
                false
            }
        });
    }

    /// Load settings from file or return defaults if file doesn't exist
    #[instrument(skip(self))]
    fn load_settings(&self) -> Result<Settings> {
        if !self.settings_file_path.exists() {
            info!(
                path = %self.settings_file_path.display(),
                "Settings file doesn't exist, using defaults"
            );
            return self.load_default_settings().context("Failed to load default settings");
        }

        info!(path = %self.settings_file_path.display(), "Loading settings from file");
        let file_content =
            fs::read_to_string(&self.settings_file_path).context("Failed to read settings file")?;
        let settings: Settings =
            serde_json::from_str(&file_content).context("Failed to parse settings file")?;

        debug!("Loaded catalog settings successfully");
        Ok(settings)
    }

    /// Save settings to file
    #[instrument(skip(self, settings))]
    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        info!(path = %self.settings_file_path.display(), "Saving settings to file");
        let settings_json =
            serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;

        if let Some(parent) = self.settings_file_path.parent()
            && !parent.exists()
        {
            info!(path = %parent.display(), "Creating settings directory");
            fs::create_dir_all(parent).context("Failed to create settings directory")?;
        }

        let tmp = self.settings_file_path.with_extension("json.tmp");
        fs::write(&tmp, settings_json).context("Failed to write temporary settings file")?;
        fs::rename(&tmp, &self.settings_file_path).context("Failed to write settings file")?;

        info!("Saved catalog settings successfully");
        Ok(())
    }

    /// Load default settings, creating the backups directory if its parent exists
    #[instrument(skip(self))]
    pub fn load_default_settings(&self) -> Result<Settings> {
        info!("Loading default settings");
        let settings = self.defaults.clone();

        let backups_location = settings.backups_location();
        debug!(path = %backups_location.display(), "Ensuring backups directory exists");
        ensure_dir_with_existing_parent(&backups_location)?;

        self.save_settings(&settings)?;
        info!("Default settings loaded and saved");
        Ok(settings)
    }
}

fn ensure_dir_with_existing_parent(dir: &Path) -> Result<()> {
    let parent = dir.parent().context("Failed to get backups directory parent")?;
    anyhow::ensure!(
        parent.exists(),
        "Backups directory parent ({}) does not exist",
        parent.display()
    );
    fs::create_dir_all(dir).context("Failed to create backups directory")?;
    Ok(())
}
