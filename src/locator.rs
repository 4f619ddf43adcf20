use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::model::ToolAvailability;

pub const YTDLP: &str = "yt-dlp";
pub const FFMPEG: &str = "ffmpeg";

/// Answers which external tools can be used for the next job.
///
/// Called once per submitted job; implementations must not cache results
/// across jobs since tools may be installed or removed in between.
pub trait ToolLocator: Send + Sync {
    fn locate(&self) -> ToolAvailability;
}

/// Looks tools up on `PATH`, preferring explicitly configured locations.
#[derive(Debug, Clone, Default)]
pub struct SystemToolLocator {
    ytdlp_override: Option<PathBuf>,
    ffmpeg_override: Option<PathBuf>,
}

impl SystemToolLocator {
    pub fn new(ytdlp_override: Option<PathBuf>, ffmpeg_override: Option<PathBuf>) -> Self {
        Self {
            ytdlp_override,
            ffmpeg_override,
        }
    }
}

impl ToolLocator for SystemToolLocator {
    fn locate(&self) -> ToolAvailability {
        let ytdlp_path = resolve(YTDLP, self.ytdlp_override.as_deref());
        let transcoder_path = resolve(FFMPEG, self.ffmpeg_override.as_deref());
        debug!(?ytdlp_path, ?transcoder_path, "probed external tools");

        ToolAvailability {
            ytdlp_present: ytdlp_path.is_some(),
            ytdlp_path,
            transcoder_present: transcoder_path.is_some(),
            transcoder_path,
        }
    }
}

fn resolve(tool: &str, configured: Option<&Path>) -> Option<PathBuf> {
    match configured {
        Some(path) => {
            let resolved = resolve_configured(tool, path);
            if resolved.is_none() {
                warn!(tool, path = %path.display(), "configured tool location does not exist");
            }
            resolved
        }
        None => which::which(tool).ok(),
    }
}

/// A configured location may name the executable or the folder holding it.
fn resolve_configured(tool: &str, path: &Path) -> Option<PathBuf> {
    if path.is_dir() {
        let exe = path.join(executable_name(tool));
        exe.is_file().then_some(exe)
    } else if path.is_file() {
        Some(path.to_path_buf())
    } else {
        which::which(path).ok()
    }
}

fn executable_name(tool: &str) -> String {
    if cfg!(windows) {
        format!("{tool}.exe")
    } else {
        tool.to_string()
    }
}
