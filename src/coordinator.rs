//! Single-slot job coordinator: the entry point presentation layers talk to.
//!
//! The coordinator lives on the caller's thread. Jobs run elsewhere and report
//! back through one channel, which the owner drains with [`JobCoordinator::pump`]
//! (frame loops) or [`JobCoordinator::run_until_idle`] (async callers).

use chrono::Local;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{JobError, PlanningError, SubmitError},
    history::HistoryLog,
    locator::ToolLocator,
    model::{DownloadRequest, JobOutcome, JobStatus},
    planner::{self, ExecutionPlan},
    runner::{JobEvent, JobEventSender, JobId, JobMessage, JobRunner, JobSuccess, ProgressEvent},
};

/// Characters of diagnostic text kept in history entries.
pub const DEFAULT_ERROR_DISPLAY_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Planning,
    Running,
}

/// A format the request asked for that cannot be produced, and its substitute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackOffer {
    pub format: String,
    pub fallback: &'static str,
}

impl FallbackOffer {
    /// Question to put to the user.
    pub fn prompt(&self) -> String {
        let reason = match self.format.as_str() {
            "mp4" => "MP4 video requires ffmpeg to merge video and audio streams.".to_string(),
            other => format!("{} conversion requires ffmpeg.", other.to_uppercase()),
        };
        format!(
            "{reason}\nffmpeg is not installed.\n\nWould you like to download as {} instead?",
            self.fallback.to_uppercase()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackDecision {
    /// Plan again with the fallback format
    Downgrade,
    /// Give up on this request
    Abort,
}

/// Callbacks through which the coordinator reports to the presentation layer.
///
/// All calls happen on the thread that owns the coordinator.
pub trait JobObserver {
    fn on_submit_rejected(&mut self, _reason: &SubmitError) {}

    fn on_job_started(&mut self, _request: &DownloadRequest, _plan: &ExecutionPlan) {}

    fn on_progress(&mut self, _progress: ProgressEvent) {}

    fn on_job_succeeded(&mut self, _outcome: &JobOutcome) {}

    fn on_job_failed(&mut self, _outcome: &JobOutcome) {}

    fn on_history_changed(&mut self, _snapshot: &[JobOutcome]) {}

    /// Asked while planning when the requested format needs ffmpeg and it is
    /// missing.
    fn offer_fallback(&mut self, request: &DownloadRequest, offer: &FallbackOffer) -> FallbackDecision;
}

struct ActiveJob {
    id: JobId,
    request: DownloadRequest,
    cancel: CancellationToken,
}

pub struct JobCoordinator<O> {
    locator: Box<dyn ToolLocator>,
    runner: Box<dyn JobRunner>,
    observer: O,
    history: HistoryLog,
    state: CoordinatorState,
    active: Option<ActiveJob>,
    next_job: JobId,
    events_tx: UnboundedSender<JobMessage>,
    events_rx: UnboundedReceiver<JobMessage>,
    error_display_limit: usize,
}

impl<O: JobObserver> JobCoordinator<O> {
    pub fn new(locator: impl ToolLocator + 'static, runner: impl JobRunner + 'static, observer: O) -> Self {
        let (events_tx, events_rx) = unbounded_channel();
        Self {
            locator: Box::new(locator),
            runner: Box::new(runner),
            observer,
            history: HistoryLog::default(),
            state: CoordinatorState::Idle,
            active: None,
            next_job: 1,
            events_tx,
            events_rx,
            error_display_limit: DEFAULT_ERROR_DISPLAY_LIMIT,
        }
    }

    pub fn with_error_display_limit(mut self, limit: usize) -> Self {
        self.error_display_limit = limit;
        self
    }

    /// Starts a download unless one is already running.
    ///
    /// Returns as soon as the job is handed to the runner; the result arrives
    /// later through the observer.
    pub fn submit(&mut self, request: DownloadRequest) -> Result<JobId, SubmitError> {
        let result = self.try_submit(request);
        if let Err(reason) = &result {
            warn!("download request rejected: {reason}");
            self.observer.on_submit_rejected(reason);
        }
        result
    }

    fn try_submit(&mut self, request: DownloadRequest) -> Result<JobId, SubmitError> {
        if self.state != CoordinatorState::Idle {
            return Err(SubmitError::AlreadyRunning);
        }
        request.validate()?;

        self.state = CoordinatorState::Planning;
        let (request, plan) = match self.plan_with_fallback(request) {
            Ok(planned) => planned,
            Err(err) => {
                self.state = CoordinatorState::Idle;
                return Err(err);
            }
        };

        let id = self.next_job;
        self.next_job += 1;
        let cancel = CancellationToken::new();
        info!(job = id, url = %request.url, mode = ?request.mode, format = %request.format, "job started");

        self.observer.on_job_started(&request, &plan);
        self.active = Some(ActiveJob {
            id,
            request,
            cancel: cancel.clone(),
        });
        self.state = CoordinatorState::Running;
        self.runner
            .run(plan, JobEventSender::new(id, self.events_tx.clone()), cancel);
        Ok(id)
    }

    fn plan_with_fallback(
        &mut self,
        request: DownloadRequest,
    ) -> Result<(DownloadRequest, ExecutionPlan), SubmitError> {
        let availability = self.locator.locate();
        match planner::plan(&request, &availability) {
            Ok(plan) => Ok((request, plan)),
            Err(PlanningError::MissingRequiredTool { format, fallback }) => {
                let offer = FallbackOffer {
                    format: format.clone(),
                    fallback,
                };
                match self.observer.offer_fallback(&request, &offer) {
                    FallbackDecision::Downgrade => {
                        info!(from = %format, to = fallback, "ffmpeg missing, downgrading format");
                        let downgraded = request.with_format(fallback);
                        let plan = planner::plan(&downgraded, &availability)?;
                        Ok((downgraded, plan))
                    }
                    FallbackDecision::Abort => Err(SubmitError::MissingRequiredTool { format, fallback }),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Handles every event already delivered, without waiting.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(msg) = self.events_rx.try_recv() {
            self.handle(msg);
            handled += 1;
        }
        handled
    }

    /// Handles events until the running job, if any, has finished.
    pub async fn run_until_idle(&mut self) {
        while self.is_busy() {
            // The coordinator holds a sender itself, so this never yields None.
            let Some(msg) = self.events_rx.recv().await else {
                break;
            };
            self.handle(msg);
        }
    }

    /// Asks the running job to stop. Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        match &self.active {
            Some(job) => {
                info!(job = job.id, "cancelling job");
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn handle(&mut self, msg: JobMessage) {
        if self.active.as_ref().map(|job| job.id) != Some(msg.job) {
            debug!(job = msg.job, "ignoring event for a job that is not running");
            return;
        }
        match msg.event {
            JobEvent::Progress(progress) => self.observer.on_progress(progress),
            JobEvent::Finished(result) => self.finish(result),
        }
    }

    fn finish(&mut self, result: Result<JobSuccess, JobError>) {
        let Some(job) = self.active.take() else {
            return;
        };
        self.state = CoordinatorState::Idle;

        let (status, error_detail, output_file) = match result {
            Ok(success) => (JobStatus::Succeeded, None, success.output_file),
            Err(err) => {
                error!(job = job.id, url = %job.request.url, "download failed: {err}");
                let detail = truncate_chars(&err.diagnostic(), self.error_display_limit);
                (JobStatus::Failed, Some(detail), None)
            }
        };
        let outcome = JobOutcome {
            request_url: job.request.url,
            mode: job.request.mode,
            format: job.request.format,
            status,
            timestamp: Local::now(),
            error_detail,
            output_file,
        };

        self.history.record(outcome.clone());
        match outcome.status {
            JobStatus::Succeeded => self.observer.on_job_succeeded(&outcome),
            JobStatus::Failed => self.observer.on_job_failed(&outcome),
        }
        let snapshot = self.history.snapshot();
        self.observer.on_history_changed(&snapshot);
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state != CoordinatorState::Idle
    }

    /// Request of the job currently running.
    pub fn active_request(&self) -> Option<&DownloadRequest> {
        self.active.as_ref().map(|job| &job.request)
    }

    pub fn history(&self) -> Vec<JobOutcome> {
        self.history.snapshot()
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
