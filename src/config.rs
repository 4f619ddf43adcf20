use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    coordinator::{DEFAULT_ERROR_DISPLAY_LIMIT, FallbackDecision},
    error::ConfigError,
    model::{MediaMode, Quality, allowed_formats},
};

/// Environment variable naming the ffmpeg executable or its folder.
pub const FFMPEG_LOCATION_ENV: &str = "FFMPEG_LOCATION";
/// Environment variable naming the yt-dlp executable or its folder.
pub const YTDLP_LOCATION_ENV: &str = "YTDLP_LOCATION";

/// What to do when the chosen format needs ffmpeg and it is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    /// Ask the user every time
    #[default]
    Ask,
    /// Switch to the format that works without ffmpeg
    Downgrade,
    /// Refuse the download
    Abort,
}

impl FallbackPolicy {
    /// Applies the policy, calling `ask` only when the user has to choose.
    pub fn decide(self, ask: impl FnOnce() -> bool) -> FallbackDecision {
        match self {
            FallbackPolicy::Ask if ask() => FallbackDecision::Downgrade,
            FallbackPolicy::Ask | FallbackPolicy::Abort => FallbackDecision::Abort,
            FallbackPolicy::Downgrade => FallbackDecision::Downgrade,
        }
    }
}

/// Settings read from `config.toml`, then the environment, then flags.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Folder new downloads are saved into
    pub download_dir: PathBuf,
    pub mode: MediaMode,
    /// Preferred format; ignored when it does not fit `mode`
    pub format: Option<String>,
    pub quality: Quality,
    pub ytdlp_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
    pub fallback: FallbackPolicy,
    /// Kill yt-dlp after this many seconds; unlimited when unset
    pub timeout_secs: Option<u64>,
    /// Characters of error text kept in the history
    pub error_display_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            mode: MediaMode::Audio,
            format: None,
            quality: Quality::Best,
            ytdlp_path: None,
            ffmpeg_path: None,
            fallback: FallbackPolicy::Ask,
            timeout_secs: None,
            error_display_limit: DEFAULT_ERROR_DISPLAY_LIMIT,
        }
    }
}

impl AppConfig {
    /// Loads `path`, or the per-user config file when it exists, then applies
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::read(path)?,
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => Self::read(&path)?,
                None => {
                    debug!("no config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env(|key| std::env::var_os(key));
        Ok(config)
    }

    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Tool locations from the environment take precedence over the file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<OsString>) {
        if let Some(path) = lookup(FFMPEG_LOCATION_ENV).and_then(clean_env_path) {
            self.ffmpeg_path = Some(path);
        }
        if let Some(path) = lookup(YTDLP_LOCATION_ENV).and_then(clean_env_path) {
            self.ytdlp_path = Some(path);
        }
    }

    /// Format to preselect for `mode`.
    pub fn initial_format(&self, mode: MediaMode) -> String {
        match &self.format {
            Some(format) if allowed_formats(mode).contains(&format.as_str()) => format.clone(),
            Some(format) => {
                warn!(format, ?mode, "configured format does not fit the mode, using default");
                mode.default_format().to_string()
            }
            None => mode.default_format().to_string(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tubegrab").join("config.toml"))
}

fn default_download_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join("Downloads").join("YouTube"),
        None => PathBuf::from("./downloads"),
    }
}

/// Strips quotes people paste around paths and expands a leading `~`.
fn clean_env_path(raw: OsString) -> Option<PathBuf> {
    let raw = raw.to_string_lossy();
    let trimmed = raw.trim().trim_matches('"').trim_matches('\'');
    if trimmed.is_empty() {
        return None;
    }
    if let Some(rest) = trimmed.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return Some(home.join(rest));
        }
    }
    Some(PathBuf::from(trimmed))
}
