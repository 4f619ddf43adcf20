//! Translates a download request into the yt-dlp invocation that satisfies it.

use std::path::PathBuf;

use crate::{
    error::PlanningError,
    locator::YTDLP,
    model::{DownloadRequest, MediaMode, Quality, ToolAvailability, fallback_format, requires_transcoder},
    progress::PROGRESS_TEMPLATE,
};

/// Fully resolved external invocation for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    program: PathBuf,
    argv: Vec<String>,
    requires_transcoder: bool,
    output_template: String,
    destination_dir: PathBuf,
}

impl ExecutionPlan {
    pub fn new(
        program: impl Into<PathBuf>,
        argv: Vec<String>,
        requires_transcoder: bool,
        output_template: impl Into<String>,
        destination_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            argv,
            requires_transcoder,
            output_template: output_template.into(),
            destination_dir: destination_dir.into(),
        }
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Arguments passed to the program, without the program itself.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn requires_transcoder(&self) -> bool {
        self.requires_transcoder
    }

    pub fn output_template(&self) -> &str {
        &self.output_template
    }

    /// Folder the process runs in and writes to.
    pub fn destination_dir(&self) -> &PathBuf {
        &self.destination_dir
    }
}

/// Builds the plan for `request`, or explains why it cannot run as asked.
pub fn plan(
    request: &DownloadRequest,
    availability: &ToolAvailability,
) -> Result<ExecutionPlan, PlanningError> {
    let url = request.validate()?;

    if !availability.ytdlp_present {
        return Err(PlanningError::DownloaderUnavailable);
    }

    let needs_transcoder = requires_transcoder(request.mode, &request.format);
    if needs_transcoder && !availability.transcoder_present {
        return Err(PlanningError::MissingRequiredTool {
            format: request.format.clone(),
            fallback: fallback_format(&request.format).unwrap_or("m4a"),
        });
    }

    let mut args: Vec<String> = Vec::new();
    match request.mode {
        MediaMode::Audio => {
            args.extend(["-x", "--audio-format", request.format.as_str()].map(String::from));
            args.extend(["--audio-quality", audio_quality(request.quality)].map(String::from));
            args.extend(["-f", "bestaudio/best"].map(String::from));
        }
        MediaMode::Video => {
            args.push("-f".into());
            args.push(video_selector(request.quality));
            args.extend(["--merge-output-format", request.format.as_str()].map(String::from));
        }
    }

    if let Some(ffmpeg) = &availability.transcoder_path {
        args.push("--ffmpeg-location".into());
        args.push(ffmpeg.to_string_lossy().into_owned());
    }

    args.extend(["--newline", "--progress-template", PROGRESS_TEMPLATE].map(String::from));

    let output_template = request
        .destination_dir
        .join("%(title)s.%(ext)s")
        .to_string_lossy()
        .into_owned();
    args.push("-o".into());
    args.push(output_template.clone());
    args.push(url.to_string());

    let program = availability
        .ytdlp_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(YTDLP));

    Ok(ExecutionPlan {
        program,
        argv: args,
        requires_transcoder: needs_transcoder,
        output_template,
        destination_dir: request.destination_dir.clone(),
    })
}

/// yt-dlp VBR scale: 0 is best, 9 is worst.
fn audio_quality(quality: Quality) -> &'static str {
    match quality {
        Quality::Best => "0",
        Quality::High => "2",
        Quality::Medium => "5",
        Quality::Low => "9",
    }
}

fn video_selector(quality: Quality) -> String {
    let height = match quality {
        Quality::Best => return "bestvideo+bestaudio/best".to_string(),
        Quality::High => 1080,
        Quality::Medium => 720,
        Quality::Low => 480,
    };
    format!("bestvideo[height<={height}]+bestaudio/best[height<={height}]")
}
