use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub status_icon: StatusIconConfig,
    #[serde(default)]
    pub library: LibraryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Keep retrying instead of exiting when the server goes away.
    #[serde(default = "default_true")]
    pub persist: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Notify once and exit.
    #[serde(default)]
    pub once: bool,
    #[serde(default)]
    pub debug: bool,
    /// Fork into the background.
    #[serde(default)]
    pub detach: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Seconds before the popup expires; 0 never expires.
    #[serde(default = "default_timeout")]
    pub timeout: u32,
    /// Previous/next buttons on the popup.
    #[serde(default = "default_true")]
    pub keys: bool,
    /// Cover art size in the popup, in pixels.
    #[serde(default = "default_icon_size")]
    pub icon_size: u32,
    #[serde(default = "default_title_format")]
    pub title_format: String,
    #[serde(default = "default_body_format")]
    pub body_format: String,
    /// Re-display the popup when playback resumes on the same song.
    #[serde(default)]
    pub reshow_on_resume: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusIconConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Tray icon edge in pixels.
    #[serde(default = "default_status_icon_size")]
    pub size: u32,
    /// Play-state glyph size as a proportion of the tray icon; 0 disables it.
    #[serde(default = "default_play_state_icon_size")]
    pub play_state_icon_size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Root of the music library, searched for cover art.
    /// An empty string disables the lookup.
    #[serde(default = "default_music_path")]
    pub music_path: String,
}

impl LibraryConfig {
    pub fn music_root(&self) -> Option<PathBuf> {
        if self.music_path.trim().is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.music_path))
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            persist: default_true(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            once: false,
            debug: false,
            detach: false,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            keys: default_true(),
            icon_size: default_icon_size(),
            title_format: default_title_format(),
            body_format: default_body_format(),
            reshow_on_resume: false,
        }
    }
}

impl Default for StatusIconConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            size: default_status_icon_size(),
            play_state_icon_size: default_play_state_icon_size(),
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            music_path: default_music_path(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u32 {
    3
}

fn default_icon_size() -> u32 {
    128
}

fn default_status_icon_size() -> u32 {
    24
}

fn default_play_state_icon_size() -> f64 {
    0.4
}

fn default_title_format() -> String {
    "%t".to_string()
}

fn default_body_format() -> String {
    "<b>%b</b><br><i>%a</i>".to_string()
}

fn default_music_path() -> String {
    "/var/lib/mpd/music".to_string()
}

impl Config {
    /// Load the config file, writing the defaults out if it is missing.
    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config.validated())
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(config_path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// Clamp out-of-range values back into something usable.
    pub fn validated(mut self) -> Self {
        let proportion = self.status_icon.play_state_icon_size;
        if !(0.0..=1.0).contains(&proportion) {
            let clamped = if proportion.is_nan() {
                default_play_state_icon_size()
            } else {
                proportion.clamp(0.0, 1.0)
            };
            tracing::warn!(
                "config: play_state_icon_size {} out of range, using {}",
                proportion,
                clamped
            );
            self.status_icon.play_state_icon_size = clamped;
        }
        if self.notification.icon_size == 0 {
            tracing::warn!("config: icon_size must be at least 1, using default");
            self.notification.icon_size = default_icon_size();
        }
        if self.status_icon.size == 0 {
            tracing::warn!("config: status_icon.size must be at least 1, using default");
            self.status_icon.size = default_status_icon_size();
        }
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            daemon: DaemonConfig::default(),
            notification: NotificationConfig::default(),
            status_icon: StatusIconConfig::default(),
            library: LibraryConfig::default(),
        }
    }
}
