//! Settings store — where TTS settings live and how updates are broadcast.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

use readaloud_core::types::TtsSettings;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("settings I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Source of truth for [`TtsSettings`].
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_settings(&self) -> TtsSettings;

    /// Replace the stored settings. `Ok` is the acknowledgement.
    async fn update_settings(&self, settings: TtsSettings) -> Result<(), SettingsError>;

    /// Receiver notified on every successful update.
    fn subscribe(&self) -> watch::Receiver<TtsSettings>;
}

pub fn validate(settings: &TtsSettings) -> Result<(), SettingsError> {
    if !(settings.speed > 0.0 && settings.speed.is_finite()) {
        return Err(SettingsError::Invalid(format!(
            "speed must be positive, got {}",
            settings.speed
        )));
    }
    if settings.api_base.trim().is_empty() {
        return Err(SettingsError::Invalid("apiBase must not be empty".into()));
    }
    Ok(())
}

// ─── In-memory ─────────────────────────────────────────────────────────────

pub struct MemorySettingsStore {
    tx: watch::Sender<TtsSettings>,
}

impl MemorySettingsStore {
    pub fn new(settings: TtsSettings) -> Self {
        let (tx, _) = watch::channel(settings);
        Self { tx }
    }
}

impl Default for MemorySettingsStore {
    fn default() -> Self {
        Self::new(TtsSettings::default())
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get_settings(&self) -> TtsSettings {
        self.tx.borrow().clone()
    }

    async fn update_settings(&self, settings: TtsSettings) -> Result<(), SettingsError> {
        validate(&settings)?;
        self.tx.send_replace(settings);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<TtsSettings> {
        self.tx.subscribe()
    }
}

// ─── JSON file ─────────────────────────────────────────────────────────────

/// Settings persisted as camelCase JSON at a fixed path.
pub struct FileSettingsStore {
    path: PathBuf,
    tx: watch::Sender<TtsSettings>,
}

impl FileSettingsStore {
    /// Load settings from `path`, falling back to defaults if the file does
    /// not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        let settings = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no settings at {}, using defaults", path.display());
                TtsSettings::default()
            }
            Err(e) => return Err(e.into()),
        };
        let (tx, _) = watch::channel(settings);
        Ok(Self { path, tx })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn get_settings(&self) -> TtsSettings {
        self.tx.borrow().clone()
    }

    async fn update_settings(&self, settings: TtsSettings) -> Result<(), SettingsError> {
        validate(&settings)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&settings)?;
        tokio::fs::write(&self.path, json).await?;
        info!("settings saved to {}", self.path.display());
        self.tx.send_replace(settings);
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<TtsSettings> {
        self.tx.subscribe()
    }
}
