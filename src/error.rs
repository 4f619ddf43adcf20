use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::model::MediaMode;

/// Problems with the request itself, found before any tool is probed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("please enter a YouTube URL")]
    EmptyUrl,

    #[error("not a valid URL: {0}")]
    InvalidUrl(String),

    #[error("not a recognized YouTube URL: {0}")]
    UnrecognizedHost(String),

    #[error("{format} is not an available {} format", .mode.label().to_lowercase())]
    UnsupportedFormat { mode: MediaMode, format: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{format} requires ffmpeg, which was not found (try {fallback} instead)")]
    MissingRequiredTool {
        format: String,
        fallback: &'static str,
    },

    #[error("yt-dlp is not installed")]
    DownloaderUnavailable,
}

/// Reasons `JobCoordinator::submit` refuses a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("a download is already in progress")]
    AlreadyRunning,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{format} requires ffmpeg, which was not found")]
    MissingRequiredTool {
        format: String,
        fallback: &'static str,
    },

    #[error("yt-dlp is not installed")]
    DownloaderUnavailable,
}

impl From<PlanningError> for SubmitError {
    fn from(err: PlanningError) -> Self {
        match err {
            PlanningError::Validation(err) => SubmitError::Validation(err),
            PlanningError::MissingRequiredTool { format, fallback } => {
                SubmitError::MissingRequiredTool { format, fallback }
            }
            PlanningError::DownloaderUnavailable => SubmitError::DownloaderUnavailable,
        }
    }
}

/// Why a launched job ended without producing a file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("yt-dlp exited with code {code:?}: {stderr}")]
    ProcessFailure { code: Option<i32>, stderr: String },

    #[error("download timed out after {0:?}")]
    TimedOut(Duration),

    #[error("download cancelled")]
    Cancelled,

    #[error("{0}")]
    Unexpected(String),
}

impl JobError {
    /// Text shown to the user: the process's own diagnostics when it has any.
    pub fn diagnostic(&self) -> String {
        match self {
            JobError::ProcessFailure { stderr, .. } => stderr.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
