use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use tokio_util::sync::CancellationToken;
use tubegrab::{
    coordinator::{CoordinatorState, FallbackDecision, FallbackOffer, JobCoordinator, JobObserver},
    error::{JobError, SubmitError, ValidationError},
    locator::ToolLocator,
    model::{DownloadRequest, JobOutcome, JobStatus, MediaMode, Quality, ToolAvailability},
    planner::ExecutionPlan,
    runner::{JobEventSender, JobRunner, JobSuccess, ProgressEvent},
};

struct FakeLocator {
    availability: ToolAvailability,
    calls: Arc<AtomicUsize>,
}

impl FakeLocator {
    fn new(transcoder: bool) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let locator = Self {
            availability: ToolAvailability {
                ytdlp_present: true,
                ytdlp_path: Some(PathBuf::from("/usr/bin/yt-dlp")),
                transcoder_present: transcoder,
                transcoder_path: transcoder.then(|| PathBuf::from("/usr/bin/ffmpeg")),
            },
            calls: Arc::clone(&calls),
        };
        (locator, calls)
    }
}

impl ToolLocator for FakeLocator {
    fn locate(&self) -> ToolAvailability {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.availability.clone()
    }
}

type StartedJob = (ExecutionPlan, JobEventSender, CancellationToken);

/// Keeps started jobs so the test decides when and how they end.
#[derive(Clone, Default)]
struct ManualRunner {
    jobs: Arc<Mutex<Vec<StartedJob>>>,
    started: Arc<AtomicUsize>,
}

impl ManualRunner {
    fn take(&self) -> StartedJob {
        self.jobs.lock().unwrap().pop().expect("no job was started")
    }

    fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

impl JobRunner for ManualRunner {
    fn run(&self, plan: ExecutionPlan, events: JobEventSender, cancel: CancellationToken) {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.jobs.lock().unwrap().push((plan, events, cancel));
    }
}

#[derive(Default)]
struct Recorder {
    decision: Option<FallbackDecision>,
    offers: Vec<FallbackOffer>,
    rejected: Vec<SubmitError>,
    started: usize,
    progress: Vec<f32>,
    succeeded: Vec<JobOutcome>,
    failed: Vec<JobOutcome>,
    history_sizes: Vec<usize>,
}

impl JobObserver for Recorder {
    fn on_submit_rejected(&mut self, reason: &SubmitError) {
        self.rejected.push(reason.clone());
    }

    fn on_job_started(&mut self, _request: &DownloadRequest, _plan: &ExecutionPlan) {
        self.started += 1;
    }

    fn on_progress(&mut self, progress: ProgressEvent) {
        self.progress.push(progress.fraction);
    }

    fn on_job_succeeded(&mut self, outcome: &JobOutcome) {
        self.succeeded.push(outcome.clone());
    }

    fn on_job_failed(&mut self, outcome: &JobOutcome) {
        self.failed.push(outcome.clone());
    }

    fn on_history_changed(&mut self, snapshot: &[JobOutcome]) {
        self.history_sizes.push(snapshot.len());
    }

    fn offer_fallback(&mut self, _request: &DownloadRequest, offer: &FallbackOffer) -> FallbackDecision {
        self.offers.push(offer.clone());
        self.decision.unwrap_or(FallbackDecision::Abort)
    }
}

fn video_request() -> DownloadRequest {
    DownloadRequest::new("https://youtu.be/abc123", MediaMode::Video, "mp4", Quality::High, "/videos")
}

fn coordinator(transcoder: bool) -> (JobCoordinator<Recorder>, ManualRunner, Arc<AtomicUsize>) {
    let (locator, calls) = FakeLocator::new(transcoder);
    let runner = ManualRunner::default();
    let coordinator = JobCoordinator::new(locator, runner.clone(), Recorder::default());
    (coordinator, runner, calls)
}

#[test]
fn video_job_succeeds_and_lands_in_history() {
    let (mut coordinator, runner, calls) = coordinator(true);

    coordinator.submit(video_request()).unwrap();
    assert_eq!(coordinator.state(), CoordinatorState::Running);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let (plan, events, _cancel) = runner.take();
    let argv = plan.argv();
    assert!(argv.iter().any(|a| a == "bestvideo[height<=1080]+bestaudio/best[height<=1080]"));
    let merge = argv.iter().position(|a| a == "--merge-output-format").unwrap();
    assert_eq!(argv[merge + 1], "mp4");
    assert_eq!(argv.last().map(String::as_str), Some("https://youtu.be/abc123"));

    events.progress(0.5);
    events.finish(Ok(JobSuccess {
        output_file: Some(PathBuf::from("/videos/Clip.mp4")),
    }));
    assert_eq!(coordinator.pump(), 2);

    assert_eq!(coordinator.state(), CoordinatorState::Idle);
    let observer = coordinator.observer();
    assert_eq!(observer.started, 1);
    assert_eq!(observer.progress, vec![0.5]);
    assert_eq!(observer.succeeded.len(), 1);
    assert_eq!(observer.history_sizes, vec![1]);

    let history = coordinator.history();
    assert_eq!(history[0].status, JobStatus::Succeeded);
    assert_eq!(history[0].request_url, "https://youtu.be/abc123");
    assert_eq!(history[0].mode, MediaMode::Video);
    assert_eq!(history[0].output_file, Some(PathBuf::from("/videos/Clip.mp4")));
    assert_eq!(history[0].error_detail, None);
}

#[test]
fn second_submit_while_running_is_rejected() {
    let (mut coordinator, runner, calls) = coordinator(true);
    coordinator.submit(video_request()).unwrap();

    let other = DownloadRequest::new("https://youtu.be/zzz", MediaMode::Audio, "m4a", Quality::Low, "/music");
    assert_eq!(coordinator.submit(other.clone()), Err(SubmitError::AlreadyRunning));

    assert_eq!(runner.started(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.state(), CoordinatorState::Running);
    assert_eq!(coordinator.active_request(), Some(&video_request()));
    assert_eq!(coordinator.observer().rejected, vec![SubmitError::AlreadyRunning]);

    let (_, events, _) = runner.take();
    events.finish(Ok(JobSuccess::default()));
    coordinator.pump();
    assert!(coordinator.submit(other).is_ok());
}

#[test]
fn declined_downgrade_returns_to_idle_without_history() {
    let (mut coordinator, runner, _) = coordinator(false);

    let err = coordinator.submit(video_request()).unwrap_err();
    assert_eq!(
        err,
        SubmitError::MissingRequiredTool {
            format: "mp4".into(),
            fallback: "webm"
        }
    );
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
    assert!(coordinator.history().is_empty());
    assert_eq!(runner.started(), 0);
    assert_eq!(
        coordinator.observer().offers,
        vec![FallbackOffer {
            format: "mp4".into(),
            fallback: "webm"
        }]
    );
    assert_eq!(coordinator.observer().rejected, vec![err]);
}

#[test]
fn missing_ytdlp_rejects_without_starting() {
    let calls = Arc::new(AtomicUsize::new(0));
    let locator = FakeLocator {
        availability: ToolAvailability::default(),
        calls: Arc::clone(&calls),
    };
    let runner = ManualRunner::default();
    let mut coordinator = JobCoordinator::new(locator, runner.clone(), Recorder::default());

    assert_eq!(coordinator.submit(video_request()), Err(SubmitError::DownloaderUnavailable));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
    assert!(coordinator.history().is_empty());
    assert!(coordinator.observer().offers.is_empty());
    assert_eq!(coordinator.observer().rejected, vec![SubmitError::DownloaderUnavailable]);
    assert_eq!(runner.started(), 0);
}

#[test]
fn accepted_downgrade_runs_with_fallback_format() {
    let (mut coordinator, runner, _) = coordinator(false);
    coordinator.observer_mut().decision = Some(FallbackDecision::Downgrade);

    let audio = DownloadRequest::new("https://youtu.be/abc123", MediaMode::Audio, "mp3", Quality::Best, "/music");
    coordinator.submit(audio).unwrap();

    assert_eq!(coordinator.active_request().map(|r| r.format.as_str()), Some("m4a"));
    let (plan, events, _) = runner.take();
    let format = plan.argv().iter().position(|a| a == "--audio-format").unwrap();
    assert_eq!(plan.argv()[format + 1], "m4a");
    assert!(!plan.requires_transcoder());

    events.finish(Ok(JobSuccess::default()));
    coordinator.pump();
    assert_eq!(coordinator.history()[0].format, "m4a");
}

#[test]
fn m4a_needs_no_transcoder() {
    let (mut coordinator, _runner, _) = coordinator(false);
    let audio = DownloadRequest::new("https://youtu.be/abc123", MediaMode::Audio, "m4a", Quality::Best, "/music");
    assert!(coordinator.submit(audio).is_ok());
    assert!(coordinator.observer().offers.is_empty());
}

#[test]
fn process_failure_is_recorded_with_short_message() {
    let (mut coordinator, runner, _) = coordinator(true);
    coordinator.submit(video_request()).unwrap();

    let (_, events, _) = runner.take();
    events.finish(Err(JobError::ProcessFailure {
        code: Some(1),
        stderr: "network unreachable".into(),
    }));
    coordinator.pump();

    assert_eq!(coordinator.state(), CoordinatorState::Idle);
    let failed = &coordinator.observer().failed;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error_detail.as_deref(), Some("network unreachable"));
    assert_eq!(coordinator.history()[0].status, JobStatus::Failed);
}

#[test]
fn long_diagnostics_are_truncated() {
    let (mut coordinator, runner, _) = coordinator(true);
    coordinator.submit(video_request()).unwrap();

    let (_, events, _) = runner.take();
    events.finish(Err(JobError::ProcessFailure {
        code: Some(1),
        stderr: "e".repeat(1000),
    }));
    coordinator.pump();

    let detail = coordinator.history()[0].error_detail.clone().unwrap();
    assert_eq!(detail.chars().count(), 200);
}

#[test]
fn validation_happens_before_tools_are_probed() {
    let (mut coordinator, runner, calls) = coordinator(true);

    let wrong_pair = DownloadRequest::new("https://youtu.be/abc123", MediaMode::Audio, "webm", Quality::Best, "/m");
    assert!(matches!(
        coordinator.submit(wrong_pair),
        Err(SubmitError::Validation(ValidationError::UnsupportedFormat { .. }))
    ));

    let empty = DownloadRequest::new("", MediaMode::Audio, "m4a", Quality::Best, "/m");
    assert_eq!(
        coordinator.submit(empty),
        Err(SubmitError::Validation(ValidationError::EmptyUrl))
    );

    let foreign = DownloadRequest::new("https://example.com/v", MediaMode::Audio, "m4a", Quality::Best, "/m");
    assert!(matches!(
        coordinator.submit(foreign),
        Err(SubmitError::Validation(ValidationError::UnrecognizedHost(_)))
    ));

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(runner.started(), 0);
    assert_eq!(coordinator.state(), CoordinatorState::Idle);
    assert_eq!(coordinator.observer().rejected.len(), 3);
}

#[test]
fn history_keeps_the_ten_latest_jobs() {
    let (mut coordinator, runner, _) = coordinator(true);

    for n in 0..11 {
        let request = DownloadRequest::new(
            format!("https://youtu.be/video{n}"),
            MediaMode::Audio,
            "m4a",
            Quality::Best,
            "/music",
        );
        coordinator.submit(request).unwrap();
        let (_, events, _) = runner.take();
        events.finish(Ok(JobSuccess::default()));
        coordinator.pump();
    }

    let urls: Vec<String> = coordinator.history().into_iter().map(|o| o.request_url).collect();
    let expected: Vec<String> = (1..11).rev().map(|n| format!("https://youtu.be/video{n}")).collect();
    assert_eq!(urls, expected);
    assert_eq!(coordinator.observer().history_sizes.last(), Some(&10));
}

#[test]
fn runner_that_gives_up_still_ends_the_job() {
    let (mut coordinator, runner, _) = coordinator(true);
    coordinator.submit(video_request()).unwrap();

    let (_, events, _) = runner.take();
    drop(events);
    coordinator.pump();

    assert_eq!(coordinator.state(), CoordinatorState::Idle);
    assert_eq!(coordinator.history()[0].status, JobStatus::Failed);
}

#[test]
fn cancel_trips_the_job_token() {
    let (mut coordinator, runner, _) = coordinator(true);
    assert!(!coordinator.cancel());

    coordinator.submit(video_request()).unwrap();
    let (_, events, cancel) = runner.take();
    assert!(coordinator.cancel());
    assert!(cancel.is_cancelled());

    events.finish(Err(JobError::Cancelled));
    coordinator.pump();
    assert_eq!(coordinator.history()[0].error_detail.as_deref(), Some("download cancelled"));
}

#[tokio::test]
async fn run_until_idle_waits_for_the_terminal_event() {
    let (mut coordinator, runner, _) = coordinator(true);
    coordinator.submit(video_request()).unwrap();

    let (_, events, _) = runner.take();
    tokio::spawn(async move {
        events.progress(1.0);
        events.finish(Ok(JobSuccess::default()));
    });
    coordinator.run_until_idle().await;

    assert!(!coordinator.is_busy());
    assert_eq!(coordinator.observer().succeeded.len(), 1);
}

/// Drives the real process runner against a stand-in yt-dlp script.
#[cfg(unix)]
#[tokio::test]
async fn fake_ytdlp_end_to_end() {
    use std::os::unix::fs::PermissionsExt;
    use tokio::runtime::Handle;
    use tubegrab::runner::ProcessRunner;

    struct ScriptLocator(PathBuf);

    impl ToolLocator for ScriptLocator {
        fn locate(&self) -> ToolAvailability {
            ToolAvailability {
                ytdlp_present: true,
                ytdlp_path: Some(self.0.clone()),
                ..Default::default()
            }
        }
    }

    let root = tempfile::tempdir().unwrap();
    let write_script = |name: &str, body: &str| {
        let path = root.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    };
    // Both scripts are written before anything is spawned.
    let good = write_script(
        "good-yt-dlp",
        "echo 'progress:  40.0%'\n\
         echo \"[download] Destination: $PWD/clip.webm\"\n\
         touch clip.webm\n\
         echo 'progress: 100.0%'",
    );
    let bad = write_script("bad-yt-dlp", "echo 'ERROR: network unreachable' >&2\nexit 1");

    let out = root.path().join("downloads");
    let request = DownloadRequest::new("https://youtu.be/abc123", MediaMode::Video, "webm", Quality::Low, &out);

    let mut coordinator = JobCoordinator::new(
        ScriptLocator(good),
        ProcessRunner::new(Handle::current()),
        Recorder::default(),
    );
    coordinator.submit(request.clone()).unwrap();
    coordinator.run_until_idle().await;

    let latest = &coordinator.history()[0];
    assert_eq!(latest.status, JobStatus::Succeeded);
    let saved = out.join("clip.webm");
    assert!(saved.is_file());
    let reported = latest.output_file.clone().unwrap();
    assert_eq!(reported.canonicalize().unwrap(), saved.canonicalize().unwrap());
    assert_eq!(coordinator.observer().progress, vec![0.4, 1.0]);

    let mut coordinator = JobCoordinator::new(
        ScriptLocator(bad),
        ProcessRunner::new(Handle::current()),
        Recorder::default(),
    );
    coordinator.submit(request).unwrap();
    coordinator.run_until_idle().await;

    let latest = &coordinator.history()[0];
    assert_eq!(latest.status, JobStatus::Failed);
    assert_eq!(latest.error_detail.as_deref(), Some("ERROR: network unreachable"));
}

#[tokio::test]
async fn unusable_destination_is_recorded_as_failed() {
    use tokio::runtime::Handle;
    use tubegrab::runner::ProcessRunner;

    let root = tempfile::tempdir().unwrap();
    let blocker = root.path().join("afile");
    std::fs::write(&blocker, b"").unwrap();

    let (locator, _) = FakeLocator::new(true);
    let mut coordinator = JobCoordinator::new(locator, ProcessRunner::new(Handle::current()), Recorder::default());
    let request = DownloadRequest::new(
        "https://youtu.be/abc123",
        MediaMode::Audio,
        "m4a",
        Quality::Best,
        blocker.join("sub"),
    );
    coordinator.submit(request).unwrap();
    coordinator.run_until_idle().await;

    assert_eq!(coordinator.state(), CoordinatorState::Idle);
    let latest = &coordinator.history()[0];
    assert_eq!(latest.status, JobStatus::Failed);
    assert!(latest.error_detail.as_deref().unwrap().starts_with("could not create"));
    assert_eq!(coordinator.observer().failed.len(), 1);
}
