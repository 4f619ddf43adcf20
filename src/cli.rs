use std::{
    io::{BufRead, IsTerminal, Write},
    path::PathBuf,
};

use clap::Parser;
use tokio::runtime::Handle;
use tracing::info;

use tubegrab::{
    config::{AppConfig, FallbackPolicy},
    coordinator::{FallbackDecision, FallbackOffer, JobCoordinator, JobObserver},
    error::SubmitError,
    locator::SystemToolLocator,
    model::{DownloadRequest, JobOutcome, JobStatus, MediaMode, Quality},
    planner::ExecutionPlan,
    runner::{ProcessRunner, ProgressEvent},
};

/// Download audio or video from YouTube with yt-dlp.
///
/// Opens the window when no URL is given.
#[derive(Debug, Parser)]
#[command(name = "tubegrab", version)]
pub struct Cli {
    /// Video URL to download without opening the window
    pub url: Option<String>,

    #[arg(short, long, value_enum)]
    pub mode: Option<MediaMode>,

    /// m4a, mp3 or wav for audio; mp4 or webm for video
    #[arg(short, long)]
    pub format: Option<String>,

    #[arg(short, long, value_enum)]
    pub quality: Option<Quality>,

    /// Folder to save into
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Config file (defaults to the per-user config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// ffmpeg executable or the folder containing it
    #[arg(long)]
    pub ffmpeg_location: Option<PathBuf>,

    /// yt-dlp executable or the folder containing it
    #[arg(long)]
    pub ytdlp: Option<PathBuf>,

    /// Switch to a format that works without ffmpeg instead of asking
    #[arg(short = 'y', long, conflicts_with = "no_fallback")]
    pub yes: bool,

    /// Never switch formats when ffmpeg is missing
    #[arg(long)]
    pub no_fallback: bool,

    /// Give up after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Flags override whatever the config file and environment said.
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.output {
            config.download_dir = dir.clone();
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(format) = &self.format {
            config.format = Some(format.clone());
        }
        if let Some(quality) = self.quality {
            config.quality = quality;
        }
        if let Some(path) = &self.ffmpeg_location {
            config.ffmpeg_path = Some(path.clone());
        }
        if let Some(path) = &self.ytdlp {
            config.ytdlp_path = Some(path.clone());
        }
        if self.yes {
            config.fallback = FallbackPolicy::Downgrade;
        } else if self.no_fallback {
            config.fallback = FallbackPolicy::Abort;
        }
        if self.timeout.is_some() {
            config.timeout_secs = self.timeout;
        }
    }

    /// Request for a headless run, if a URL was given.
    pub fn request(&self, config: &AppConfig) -> Option<DownloadRequest> {
        let url = self.url.as_ref()?;
        // An explicit format is passed through untouched so a wrong pair is
        // reported instead of silently replaced.
        let format = match &self.format {
            Some(format) => format.clone(),
            None => config.initial_format(config.mode),
        };
        Some(DownloadRequest::new(
            url.clone(),
            config.mode,
            format,
            config.quality,
            config.download_dir.clone(),
        ))
    }
}

/// Reports to the terminal and answers fallback questions on stdin.
pub struct CliObserver {
    policy: FallbackPolicy,
}

impl CliObserver {
    pub fn new(policy: FallbackPolicy) -> Self {
        Self { policy }
    }
}

impl JobObserver for CliObserver {
    fn on_submit_rejected(&mut self, reason: &SubmitError) {
        eprintln!("error: {reason}");
    }

    fn on_job_started(&mut self, request: &DownloadRequest, _plan: &ExecutionPlan) {
        println!(
            "Downloading {} as {} into {}",
            request.url,
            request.format,
            request.destination_dir.display()
        );
    }

    fn on_progress(&mut self, progress: ProgressEvent) {
        eprint!("\r{:>5.1}%", progress.fraction * 100.0);
        let _ = std::io::stderr().flush();
    }

    fn on_job_succeeded(&mut self, outcome: &JobOutcome) {
        eprintln!();
        match &outcome.output_file {
            Some(file) => println!("Saved {}", file.display()),
            None => println!("Download completed successfully"),
        }
    }

    fn on_job_failed(&mut self, outcome: &JobOutcome) {
        eprintln!();
        eprintln!(
            "Download failed: {}",
            outcome.error_detail.as_deref().unwrap_or("unknown error")
        );
    }

    fn offer_fallback(&mut self, _request: &DownloadRequest, offer: &FallbackOffer) -> FallbackDecision {
        self.policy.decide(|| ask_yes_no(&offer.prompt()))
    }
}

fn ask_yes_no(question: &str) -> bool {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        eprintln!("{question}\n(no terminal to answer on, pass --yes to switch formats)");
        return false;
    }
    eprint!("{question} [y/N] ");
    let _ = std::io::stderr().flush();

    let mut answer = String::new();
    if stdin.lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Runs one download to completion. Returns whether it succeeded.
pub async fn run_headless(request: DownloadRequest, config: &AppConfig) -> bool {
    let locator = SystemToolLocator::new(config.ytdlp_path.clone(), config.ffmpeg_path.clone());
    let runner = ProcessRunner::new(Handle::current()).with_timeout(config.timeout());
    let mut coordinator = JobCoordinator::new(locator, runner, CliObserver::new(config.fallback))
        .with_error_display_limit(config.error_display_limit);

    if coordinator.submit(request).is_err() {
        return false;
    }

    let interrupted = tokio::select! {
        _ = coordinator.run_until_idle() => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        info!("interrupted, stopping download");
        coordinator.cancel();
        coordinator.run_until_idle().await;
    }

    coordinator
        .history()
        .first()
        .is_some_and(|outcome| outcome.status == JobStatus::Succeeded)
}
