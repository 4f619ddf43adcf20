use std::{fmt, path::PathBuf};

use chrono::{DateTime, Local};
use serde::Deserialize;
use url::Url;

use crate::error::ValidationError;

/// Hosts a submitted URL may point at (subdomains included).
const RECOGNIZED_HOSTS: &[&str] = &["youtube.com", "youtu.be", "youtube-nocookie.com"];

const AUDIO_FORMATS: &[&str] = &["m4a", "mp3", "wav"];
const VIDEO_FORMATS: &[&str] = &["mp4", "webm"];

/// Whether the job extracts an audio track or keeps the video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MediaMode {
    /// Extract and encode audio only
    Audio,
    /// Download video and audio, merged into one container
    Video,
}

impl MediaMode {
    pub fn label(self) -> &'static str {
        match self {
            MediaMode::Audio => "AUDIO",
            MediaMode::Video => "VIDEO",
        }
    }

    /// Format a freshly selected mode should start with.
    pub fn default_format(self) -> &'static str {
        allowed_formats(self)[0]
    }
}

/// Quality tier requested by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Best,
    High,
    Medium,
    Low,
}

impl Quality {
    pub const ALL: [Quality; 4] = [Quality::Best, Quality::High, Quality::Medium, Quality::Low];

    pub fn label(self) -> &'static str {
        match self {
            Quality::Best => "Best",
            Quality::High => "High",
            Quality::Medium => "Medium",
            Quality::Low => "Low",
        }
    }
}

/// Container/codec names permitted for a mode, in display order.
pub fn allowed_formats(mode: MediaMode) -> &'static [&'static str] {
    match mode {
        MediaMode::Audio => AUDIO_FORMATS,
        MediaMode::Video => VIDEO_FORMATS,
    }
}

/// Format that avoids the transcoder, for formats that need it.
pub fn fallback_format(format: &str) -> Option<&'static str> {
    match format {
        "mp3" => Some("m4a"),
        "mp4" => Some("webm"),
        _ => None,
    }
}

/// Formats that can only be produced with the transcoder present.
pub fn requires_transcoder(mode: MediaMode, format: &str) -> bool {
    matches!((mode, format), (MediaMode::Audio, "mp3") | (MediaMode::Video, "mp4"))
}

/// Everything the user chose for a single download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Source page URL as typed by the user
    pub url: String,
    pub mode: MediaMode,
    /// Container/codec, one of `allowed_formats(mode)`
    pub format: String,
    pub quality: Quality,
    /// Folder the file is saved into; created if missing
    pub destination_dir: PathBuf,
}

impl DownloadRequest {
    pub fn new(
        url: impl Into<String>,
        mode: MediaMode,
        format: impl Into<String>,
        quality: Quality,
        destination_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            url: url.into(),
            mode,
            format: format.into(),
            quality,
            destination_dir: destination_dir.into(),
        }
    }

    /// Same request with another format, used when downgrading.
    pub fn with_format(&self, format: &str) -> Self {
        Self {
            format: format.to_string(),
            ..self.clone()
        }
    }

    /// Checks the URL and the mode/format pair, returning the normalized URL.
    pub fn validate(&self) -> Result<Url, ValidationError> {
        let url = parse_source_url(&self.url)?;
        if !allowed_formats(self.mode).contains(&self.format.as_str()) {
            return Err(ValidationError::UnsupportedFormat {
                mode: self.mode,
                format: self.format.clone(),
            });
        }
        Ok(url)
    }

    /// Video identifier used for thumbnail lookup.
    pub fn video_id(&self) -> Option<String> {
        video_id_from_url(&self.url)
    }
}

/// Extracts the video identifier from any accepted URL form.
pub fn video_id_from_url(raw: &str) -> Option<String> {
    parse_source_url(raw).ok().and_then(|url| video_id(&url))
}

fn parse_source_url(raw: &str) -> Result<Url, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }

    let url = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("https://{trimmed}"))
            .map_err(|_| ValidationError::InvalidUrl(trimmed.to_string()))?,
        Err(_) => return Err(ValidationError::InvalidUrl(trimmed.to_string())),
    };

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::UnrecognizedHost(trimmed.to_string()));
    }

    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let recognized = RECOGNIZED_HOSTS
        .iter()
        .any(|known| host == *known || host.ends_with(&format!(".{known}")));
    if !recognized {
        return Err(ValidationError::UnrecognizedHost(trimmed.to_string()));
    }

    Ok(url)
}

fn video_id(url: &Url) -> Option<String> {
    let id = if url.host_str()? == "youtu.be" {
        url.path_segments()?.next().map(str::to_string)
    } else if let Some((_, v)) = url.query_pairs().find(|(key, _)| key == "v") {
        Some(v.into_owned())
    } else {
        let mut segments = url.path_segments()?;
        match segments.next() {
            Some("shorts") | Some("embed") | Some("live") => segments.next().map(str::to_string),
            _ => None,
        }
    };
    id.filter(|id| !id.is_empty())
}

/// Result of probing the environment for the external executables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolAvailability {
    pub ytdlp_present: bool,
    pub ytdlp_path: Option<PathBuf>,
    pub transcoder_present: bool,
    pub transcoder_path: Option<PathBuf>,
}

/// Final state of a finished job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn label(self) -> &'static str {
        match self {
            JobStatus::Succeeded => "Success",
            JobStatus::Failed => "Failed",
        }
    }
}

/// One entry of the download history.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub request_url: String,
    pub mode: MediaMode,
    pub format: String,
    pub status: JobStatus,
    pub timestamp: DateTime<Local>,
    /// Diagnostic text shortened for display; `None` on success
    pub error_detail: Option<String>,
    /// File reported by yt-dlp, when it could be detected
    pub output_file: Option<PathBuf>,
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let url: String = self.request_url.chars().take(50).collect();
        write!(
            f,
            "[{}] {} - {}: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.mode.label(),
            self.status.label(),
            url
        )?;
        if self.request_url.chars().count() > 50 {
            f.write_str("...")?;
        }
        Ok(())
    }
}
