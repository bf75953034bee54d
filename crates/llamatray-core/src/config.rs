//! Indicator configuration: persisted settings and a change-notifying store.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

pub const MIN_POLLING_INTERVAL_SECS: u64 = 1;
pub const MAX_POLLING_INTERVAL_SECS: u64 = 3600;
pub const MAX_GPU_RAM_MB: u32 = 100_000;

/// Env var that overrides the stored base URL.
pub const URL_ENV: &str = "LLAMATRAY_URL";

/// Persisted indicator settings (`config.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrayConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: u64,
    /// Total GPU memory in MB. 0 disables utilization tracking.
    #[serde(default)]
    pub gpu_ram_mb: u32,
    #[serde(default = "default_true")]
    pub show_tray_text: bool,
    #[serde(default = "default_true")]
    pub show_gpu_usage: bool,
    #[serde(default = "default_true")]
    pub show_cpu_usage: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}
fn default_polling_interval() -> u64 {
    DEFAULT_POLLING_INTERVAL_SECS
}
fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
fn default_true() -> bool {
    true
}

impl Default for TrayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            polling_interval_secs: DEFAULT_POLLING_INTERVAL_SECS,
            gpu_ram_mb: 0,
            show_tray_text: true,
            show_gpu_usage: true,
            show_cpu_usage: true,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl TrayConfig {
    /// The subset of settings that shapes the view model.
    pub fn display(&self) -> DisplaySettings {
        DisplaySettings {
            gpu_capacity_mb: self.gpu_ram_mb,
            show_tray_text: self.show_tray_text,
            show_gpu_usage: self.show_gpu_usage,
            show_cpu_usage: self.show_cpu_usage,
        }
    }

    /// Check every field against the settings-boundary rules.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.base_url)?;
        validate_polling_interval(self.polling_interval_secs)?;
        validate_gpu_ram(self.gpu_ram_mb)?;
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request timeout must be at least 1 second".into()));
        }
        Ok(())
    }
}

/// Settings consumed by view-model derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySettings {
    pub gpu_capacity_mb: u32,
    pub show_tray_text: bool,
    pub show_gpu_usage: bool,
    pub show_cpu_usage: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        TrayConfig::default().display()
    }
}

/// A single applied settings change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigChange {
    BaseUrl(String),
    PollingInterval(u64),
    GpuRam(u32),
    ShowTrayText(bool),
    ShowGpuUsage(bool),
    ShowCpuUsage(bool),
}

impl ConfigChange {
    /// Whether the change only affects how the view model is derived.
    pub fn affects_display_only(&self) -> bool {
        matches!(
            self,
            ConfigChange::GpuRam(_)
                | ConfigChange::ShowTrayText(_)
                | ConfigChange::ShowGpuUsage(_)
                | ConfigChange::ShowCpuUsage(_)
        )
    }
}

/// Accepts `http://…` and `https://…` with a non-empty remainder.
pub fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"));
    match rest {
        Some(rest) if !rest.is_empty() => Ok(()),
        _ => Err(Error::Config(format!(
            "invalid URL '{}': expected http://… or https://…",
            url
        ))),
    }
}

pub fn validate_polling_interval(secs: u64) -> Result<()> {
    if (MIN_POLLING_INTERVAL_SECS..=MAX_POLLING_INTERVAL_SECS).contains(&secs) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "polling interval must be between {} and {} seconds, got {}",
            MIN_POLLING_INTERVAL_SECS, MAX_POLLING_INTERVAL_SECS, secs
        )))
    }
}

pub fn validate_gpu_ram(mb: u32) -> Result<()> {
    if mb <= MAX_GPU_RAM_MB {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "GPU RAM must be at most {} MB, got {}",
            MAX_GPU_RAM_MB, mb
        )))
    }
}

/// Shared, mutable configuration with change notifications.
///
/// Setters validate first; rejected values are never stored. Accepted
/// values are persisted (when the store has a path) and broadcast to every
/// subscriber. Setting a field to its current value is a no-op.
pub struct ConfigStore {
    config: RwLock<TrayConfig>,
    path: Option<PathBuf>,
    changes: broadcast::Sender<ConfigChange>,
}

impl ConfigStore {
    /// A store that never touches the filesystem.
    pub fn in_memory(config: TrayConfig) -> Self {
        let (changes, _) = broadcast::channel(32);
        Self {
            config: RwLock::new(config),
            path: None,
            changes,
        }
    }

    /// Load config from a JSON file, falling back to defaults when the file
    /// is missing, unreadable or invalid.
    pub fn load(path: &Path) -> Self {
        let config = std::fs::read_to_string(path)
            .ok()
            .and_then(|s| match serde_json::from_str::<TrayConfig>(&s) {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!("Ignoring malformed config {}: {}", path.display(), e);
                    None
                }
            })
            .filter(|c| match c.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!("Ignoring invalid config {}: {}", path.display(), e);
                    false
                }
            })
            .unwrap_or_default();

        let (changes, _) = broadcast::channel(32);
        Self {
            config: RwLock::new(config),
            path: Some(path.to_path_buf()),
            changes,
        }
    }

    /// [`ConfigStore::load`], then apply environment overrides.
    pub fn from_env(path: &Path) -> Self {
        let store = Self::load(path);
        if let Ok(url) = std::env::var(URL_ENV) {
            match validate_url(&url) {
                Ok(()) => store.config.write().base_url = url.trim().to_string(),
                Err(e) => warn!("Ignoring {}: {}", URL_ENV, e),
            }
        }
        store
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> TrayConfig {
        self.config.read().clone()
    }

    pub fn display(&self) -> DisplaySettings {
        self.config.read().display()
    }

    /// Receive every change applied after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.changes.subscribe()
    }

    /// Save the current config to disk.
    pub fn save(&self) -> Result<()> {
        let snapshot = self.snapshot();
        self.write_file(&snapshot)
    }

    fn write_file(&self, config: &TrayConfig) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(config)?;
        std::fs::write(path, json)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }

    pub fn set_base_url(&self, url: &str) -> Result<bool> {
        validate_url(url)?;
        let url = url.trim().to_string();
        self.update(ConfigChange::BaseUrl(url.clone()), |c| {
            if c.base_url == url {
                return false;
            }
            c.base_url = url;
            true
        })
    }

    pub fn set_polling_interval(&self, secs: u64) -> Result<bool> {
        validate_polling_interval(secs)?;
        self.update(ConfigChange::PollingInterval(secs), |c| {
            std::mem::replace(&mut c.polling_interval_secs, secs) != secs
        })
    }

    pub fn set_gpu_ram(&self, mb: u32) -> Result<bool> {
        validate_gpu_ram(mb)?;
        self.update(ConfigChange::GpuRam(mb), |c| {
            std::mem::replace(&mut c.gpu_ram_mb, mb) != mb
        })
    }

    pub fn set_show_tray_text(&self, on: bool) -> Result<bool> {
        self.update(ConfigChange::ShowTrayText(on), |c| {
            std::mem::replace(&mut c.show_tray_text, on) != on
        })
    }

    pub fn set_show_gpu_usage(&self, on: bool) -> Result<bool> {
        self.update(ConfigChange::ShowGpuUsage(on), |c| {
            std::mem::replace(&mut c.show_gpu_usage, on) != on
        })
    }

    pub fn set_show_cpu_usage(&self, on: bool) -> Result<bool> {
        self.update(ConfigChange::ShowCpuUsage(on), |c| {
            std::mem::replace(&mut c.show_cpu_usage, on) != on
        })
    }

    /// Apply `mutate` to a copy, persist it, then swap it in and notify.
    /// Returns whether anything changed.
    fn update<F>(&self, change: ConfigChange, mutate: F) -> Result<bool>
    where
        F: FnOnce(&mut TrayConfig) -> bool,
    {
        let mut config = self.config.write();
        let mut next = config.clone();
        if !mutate(&mut next) {
            return Ok(false);
        }
        self.write_file(&next)?;
        *config = next;
        drop(config);

        // No receivers is fine; nobody is listening yet.
        let _ = self.changes.send(change);
        Ok(true)
    }
}
