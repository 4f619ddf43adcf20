//! Native window for the downloader, drawn with egui.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use eframe::{App, Frame, egui};
use egui::{Color32, ColorImage, TextureOptions, Visuals};
use once_cell::sync::OnceCell;
use rfd::{FileDialog, MessageButtons, MessageDialog, MessageLevel};
use tokio::runtime::Runtime;
use tracing::info;

use tubegrab::{
    config::{AppConfig, FallbackPolicy},
    coordinator::{FallbackDecision, FallbackOffer, JobCoordinator, JobObserver},
    error::SubmitError,
    locator::{SystemToolLocator, ToolLocator},
    model::{
        DownloadRequest, JobOutcome, JobStatus, MediaMode, Quality, ToolAvailability, allowed_formats,
        requires_transcoder, video_id_from_url,
    },
    planner::ExecutionPlan,
    runner::{ProcessRunner, ProgressEvent},
};

use crate::thumbnail;

// Global Tokio runtime stored in a OnceCell for lazy init
static RUNTIME: OnceCell<Arc<Runtime>> = OnceCell::new();

/// Opens the window and blocks until it is closed.
pub fn run(config: AppConfig) -> anyhow::Result<()> {
    let runtime = RUNTIME.get_or_try_init(|| Runtime::new().map(Arc::new))?;

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([900.0, 640.0]),
        ..Default::default()
    };
    eframe::run_native(
        "YouTube Downloader",
        options,
        Box::new(move |cc| {
            // Use dark theme visuals
            cc.egui_ctx.set_visuals(Visuals::dark());
            Box::new(DownloaderApp::new(config, Arc::clone(runtime)))
        }),
    )
    .map_err(|e| anyhow::anyhow!("failed to open the window: {e}"))
}

/// Line shown under the Download button.
enum StatusLine {
    Ready,
    Working(String),
    Done(String),
    Failed(String),
}

/// Everything the coordinator reports, kept for drawing.
struct UiState {
    status: StatusLine,
    progress: f32,
    history: Vec<JobOutcome>,
    fallback_policy: FallbackPolicy,
    /// Set when a download finished and the URL field should be emptied
    clear_url: bool,
}

impl JobObserver for UiState {
    fn on_submit_rejected(&mut self, reason: &SubmitError) {
        self.status = StatusLine::Failed(reason.to_string());
    }

    fn on_job_started(&mut self, request: &DownloadRequest, _plan: &ExecutionPlan) {
        self.status = StatusLine::Working(format!("Downloading {}...", request.format.to_uppercase()));
        self.progress = 0.0;
    }

    fn on_progress(&mut self, progress: ProgressEvent) {
        self.progress = progress.fraction;
    }

    fn on_job_succeeded(&mut self, outcome: &JobOutcome) {
        let saved = match &outcome.output_file {
            Some(file) => format!("Saved to: {}", file.display()),
            None => "Download completed successfully!".to_string(),
        };
        self.status = StatusLine::Done(saved);
        self.progress = 1.0;
        self.clear_url = true;
    }

    fn on_job_failed(&mut self, outcome: &JobOutcome) {
        let detail = outcome.error_detail.as_deref().unwrap_or("Unknown error");
        self.status = StatusLine::Failed(format!("Download failed: {detail}"));
        self.progress = 0.0;
    }

    fn on_history_changed(&mut self, snapshot: &[JobOutcome]) {
        self.history = snapshot.to_vec();
    }

    fn offer_fallback(&mut self, _request: &DownloadRequest, offer: &FallbackOffer) -> FallbackDecision {
        self.fallback_policy.decide(|| {
            MessageDialog::new()
                .set_level(MessageLevel::Warning)
                .set_title("ffmpeg Not Found")
                .set_description(&offer.prompt())
                .set_buttons(MessageButtons::YesNo)
                .show()
        })
    }
}

/// Application state for the GUI
struct DownloaderApp {
    coordinator: JobCoordinator<UiState>,
    /// Used for the footer; jobs probe through the coordinator
    locator: SystemToolLocator,
    tools: ToolAvailability,
    runtime: Arc<Runtime>,
    url_input: String,
    download_folder: String,
    mode: MediaMode,
    format: String,
    quality: Quality,
    /// Folder of the last finished download, for the Open Folder button
    last_folder: Option<PathBuf>,
    /// Cached textures for video thumbnails
    thumbnails: HashMap<String, egui::TextureHandle>,
    /// Incoming thumbnail fetch results (video_id, image)
    thumbnail_results: Arc<Mutex<Vec<(String, ColorImage)>>>,
    /// Video id the preview currently belongs to
    preview_id: Option<String>,
}

impl DownloaderApp {
    fn new(config: AppConfig, runtime: Arc<Runtime>) -> Self {
        let locator = SystemToolLocator::new(config.ytdlp_path.clone(), config.ffmpeg_path.clone());
        let runner = ProcessRunner::new(runtime.handle().clone()).with_timeout(config.timeout());
        let state = UiState {
            status: StatusLine::Ready,
            progress: 0.0,
            history: Vec::new(),
            fallback_policy: config.fallback,
            clear_url: false,
        };
        let coordinator = JobCoordinator::new(locator.clone(), runner, state)
            .with_error_display_limit(config.error_display_limit);

        Self {
            coordinator,
            tools: locator.locate(),
            locator,
            runtime,
            url_input: String::new(),
            download_folder: config.download_dir.display().to_string(),
            mode: config.mode,
            format: config.initial_format(config.mode),
            quality: config.quality,
            last_folder: None,
            thumbnails: HashMap::new(),
            thumbnail_results: Arc::new(Mutex::new(Vec::new())),
            preview_id: None,
        }
    }

    fn start_download(&mut self) {
        let request = DownloadRequest::new(
            self.url_input.trim(),
            self.mode,
            self.format.clone(),
            self.quality,
            PathBuf::from(self.download_folder.trim()),
        );
        if self.coordinator.submit(request).is_ok() {
            // Reflect a downgrade chosen in the fallback dialog
            if let Some(active) = self.coordinator.active_request() {
                self.format = active.format.clone();
                self.last_folder = Some(active.destination_dir.clone());
            }
        }
    }

    /// Spawns a fire-and-forget fetch of the preview for the typed URL.
    fn request_thumbnail(&mut self, ctx: &egui::Context) {
        let id = video_id_from_url(&self.url_input);
        if id == self.preview_id {
            return;
        }
        self.preview_id = id.clone();
        let Some(id) = id else {
            return;
        };
        if self.thumbnails.contains_key(&id) {
            return;
        }

        let results = Arc::clone(&self.thumbnail_results);
        let ctx = ctx.clone();
        self.runtime.spawn_blocking(move || {
            if let Some(img) = thumbnail::fetch_thumbnail(&id) {
                if let Ok(mut pending) = results.lock() {
                    pending.push((id, img));
                }
                ctx.request_repaint();
            }
        });
    }

    fn history_panel(&self, ui: &mut egui::Ui) {
        ui.heading("Download History");
        ui.separator();

        egui::ScrollArea::vertical()
            .auto_shrink([false; 2])
            .show(ui, |ui| {
                let history = &self.coordinator.observer().history;
                if history.is_empty() {
                    ui.weak("Nothing downloaded yet");
                }
                for outcome in history {
                    let color = match outcome.status {
                        JobStatus::Succeeded => Color32::from_rgb(0x2e, 0xcc, 0x71),
                        JobStatus::Failed => Color32::from_rgb(0xe7, 0x4c, 0x3c),
                    };
                    let label = ui.colored_label(color, outcome.to_string());
                    if let Some(detail) = &outcome.error_detail {
                        label.on_hover_text(detail.as_str());
                    }
                }
            });
    }

    fn options(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label("📥 Download Mode:");
            for (mode, text) in [(MediaMode::Audio, "🎵 Audio"), (MediaMode::Video, "🎬 Video")] {
                if ui.radio_value(&mut self.mode, mode, text).changed() {
                    self.format = mode.default_format().to_string();
                }
            }
        });

        // Only the formats of the selected mode are offered
        ui.horizontal(|ui| {
            ui.label("📄 Format:");
            for format in allowed_formats(self.mode) {
                let mut text = format.to_uppercase();
                if !requires_transcoder(self.mode, format) && *format != "wav" {
                    text.push_str(" (No ffmpeg)");
                }
                ui.radio_value(&mut self.format, format.to_string(), text);
            }
        });

        ui.horizontal(|ui| {
            ui.label("⚙ Quality:");
            for quality in Quality::ALL {
                ui.radio_value(&mut self.quality, quality, quality.label());
            }
        });

        ui.horizontal(|ui| {
            ui.label("📁 Save to:");
            ui.text_edit_singleline(&mut self.download_folder);
            if ui.button("Browse…").clicked() {
                if let Some(folder) = FileDialog::new().set_directory(&self.download_folder).pick_folder() {
                    self.download_folder = folder.display().to_string();
                }
            }
        });
    }

    fn footer(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let ytdlp = if self.tools.ytdlp_present {
                "✅ yt-dlp ready"
            } else {
                "❌ yt-dlp not found"
            };
            let ffmpeg = if self.tools.transcoder_present {
                "✅ ffmpeg available"
            } else {
                "⚠ ffmpeg not found (MP3/MP4 unavailable)"
            };
            ui.weak(format!("{ytdlp} | {ffmpeg}"));
            if ui.small_button("↻").on_hover_text("Check again").clicked() {
                self.tools = self.locator.locate();
            }
        });
    }
}

/// GUI update loop: called each frame to redraw and handle interactions
impl App for DownloaderApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        // Deliver job events on this thread
        self.coordinator.pump();
        if std::mem::take(&mut self.coordinator.observer_mut().clear_url) {
            reset_input(&mut self.url_input, &mut self.preview_id);
        }

        // Handle completed thumbnail fetches
        if let Ok(mut pending) = self.thumbnail_results.lock() {
            for (vid, img) in pending.drain(..) {
                let tex = ctx.load_texture(&vid, img, TextureOptions::default());
                self.thumbnails.insert(vid, tex);
            }
        }

        egui::SidePanel::right("history_panel")
            .min_width(320.0)
            .show(ctx, |ui| self.history_panel(ui));

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("🎬 YouTube Downloader");
            ui.add_space(8.0);

            ui.label("📎 YouTube URL:");
            let url_field = ui.text_edit_singleline(&mut self.url_input);
            let submitted = url_field.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            if url_field.changed() {
                self.request_thumbnail(ctx);
            }

            match self.preview_id.as_ref().and_then(|id| self.thumbnails.get(id)) {
                Some(tex) => {
                    ui.image(tex);
                }
                None => {
                    ui.weak("🖼 Thumbnail preview will appear here");
                }
            }
            ui.separator();

            self.options(ui);
            ui.separator();

            let busy = self.coordinator.is_busy();
            ui.horizontal(|ui| {
                let label = if busy { "⏳ Downloading..." } else { "⬇ Download" };
                if ui.add_enabled(!busy, egui::Button::new(label)).clicked() || (submitted && !busy) {
                    self.start_download();
                }
                if busy && ui.button("Cancel").clicked() {
                    self.coordinator.cancel();
                }
            });

            let state = self.coordinator.observer();
            match &state.status {
                StatusLine::Ready => {
                    ui.label("Ready to download");
                }
                StatusLine::Working(text) => {
                    ui.label(text.as_str());
                }
                StatusLine::Done(text) => {
                    ui.colored_label(Color32::from_rgb(0x2e, 0xcc, 0x71), format!("✅ {text}"));
                }
                StatusLine::Failed(text) => {
                    ui.colored_label(Color32::from_rgb(0xe7, 0x4c, 0x3c), format!("❌ {text}"));
                }
            }
            ui.add(egui::ProgressBar::new(state.progress).show_percentage());

            if matches!(state.status, StatusLine::Done(_)) {
                if let Some(folder) = &self.last_folder {
                    if ui.button("Open Folder").clicked() {
                        open_folder(folder);
                    }
                }
            }

            ui.with_layout(egui::Layout::bottom_up(egui::Align::LEFT), |ui| self.footer(ui));
        });

        // Request periodic repaint for progress updates
        ctx.request_repaint_after(Duration::from_millis(100));
    }
}

/// Empties the URL field along with the preview that belonged to it.
fn reset_input(url_input: &mut String, preview_id: &mut Option<String>) {
    url_input.clear();
    *preview_id = None;
}

/// Shows the folder in the platform file manager.
fn open_folder(folder: &Path) {
    info!(folder = %folder.display(), "opening download folder");
    let folder = folder.to_path_buf();
    std::thread::spawn(move || {
        #[cfg(target_os = "windows")]
        {
            let _ = std::process::Command::new("explorer").arg(folder).spawn();
        }
        #[cfg(target_os = "macos")]
        {
            let _ = std::process::Command::new("open").arg(folder).spawn();
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            let _ = std::process::Command::new("xdg-open").arg(folder).spawn();
        }
    });
}
