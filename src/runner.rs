use std::{path::PathBuf, process::Stdio, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::Command,
    runtime::Handle,
    sync::mpsc::UnboundedSender,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::JobError,
    planner::ExecutionPlan,
    progress::{parse_destination_from_line, parse_progress_from_line},
};

/// Identifies one submitted job for the lifetime of the process.
pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    /// 0.0 to 1.0 of the file currently being downloaded
    pub fraction: f32,
}

/// What a successful run reported about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSuccess {
    pub output_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Progress(ProgressEvent),
    /// Terminal event, sent exactly once per job
    Finished(Result<JobSuccess, JobError>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobMessage {
    pub job: JobId,
    pub event: JobEvent,
}

/// Sending half handed to a runner for a single job.
///
/// Not `Clone`: `finish` consumes it, so a job can only end once. Dropping it
/// unfinished (a panicking job task) reports an unexpected failure instead.
#[derive(Debug)]
pub struct JobEventSender {
    job: JobId,
    tx: UnboundedSender<JobMessage>,
    finished: bool,
}

impl JobEventSender {
    pub fn new(job: JobId, tx: UnboundedSender<JobMessage>) -> Self {
        Self {
            job,
            tx,
            finished: false,
        }
    }

    pub fn job(&self) -> JobId {
        self.job
    }

    pub fn progress(&self, fraction: f32) {
        self.send(JobEvent::Progress(ProgressEvent { fraction }));
    }

    pub fn finish(mut self, result: Result<JobSuccess, JobError>) {
        self.finished = true;
        self.send(JobEvent::Finished(result));
    }

    fn send(&self, event: JobEvent) {
        // The coordinator may already be gone when the app is closing.
        if self.tx.send(JobMessage { job: self.job, event }).is_err() {
            debug!(job = self.job, "job event dropped, receiver closed");
        }
    }
}

impl Drop for JobEventSender {
    fn drop(&mut self) {
        if !self.finished {
            self.send(JobEvent::Finished(Err(JobError::Unexpected(
                "job stopped without reporting a result".into(),
            ))));
        }
    }
}

/// Executes plans off the caller's thread.
///
/// `run` must return without waiting for the job; all results travel through
/// `events`.
pub trait JobRunner: Send + Sync {
    fn run(&self, plan: ExecutionPlan, events: JobEventSender, cancel: CancellationToken);
}

/// Runs yt-dlp as a child process on a tokio runtime.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    handle: Handle,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            timeout: None,
        }
    }

    /// Kill the process and fail the job if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl JobRunner for ProcessRunner {
    fn run(&self, plan: ExecutionPlan, events: JobEventSender, cancel: CancellationToken) {
        let timeout = self.timeout;
        self.handle.spawn(async move {
            info!(
                job = events.job(),
                program = %plan.program().display(),
                args = ?plan.argv(),
                "launching download"
            );
            let result = execute(&plan, &events, &cancel, timeout).await;
            match &result {
                Ok(success) => info!(job = events.job(), output = ?success.output_file, "download finished"),
                Err(err) => warn!(job = events.job(), "download failed: {err}"),
            }
            events.finish(result);
        });
    }
}

async fn execute(
    plan: &ExecutionPlan,
    events: &JobEventSender,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> Result<JobSuccess, JobError> {
    let dir = plan.destination_dir();
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| JobError::Unexpected(format!("could not create {}: {e}", dir.display())))?;

    let mut cmd = Command::new(plan.program());
    cmd.args(plan.argv())
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    configure_for_background(&mut cmd);

    let mut child = cmd.spawn().map_err(|e| {
        JobError::Unexpected(format!("failed to start {}: {e}", plan.program().display()))
    })?;

    let (Some(stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(JobError::Unexpected("process output was not captured".into()));
    };

    // Drained concurrently so a chatty stderr cannot stall the child.
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr.read_to_end(&mut buf).await.map(|_| buf)
    });

    let work = async {
        // Titles may arrive in the console code page, so decode leniently.
        let mut lines = BufReader::new(stdout).split(b'\n');
        let mut output_file = None;
        while let Some(raw) = lines.next_segment().await? {
            let decoded = String::from_utf8_lossy(&raw);
            let line = decoded.trim_end_matches('\r');
            debug!(job = events.job(), "yt-dlp> {line}");
            if let Some(fraction) = parse_progress_from_line(line) {
                events.progress(fraction);
            } else if let Some(path) = parse_destination_from_line(line) {
                output_file = Some(path);
            }
        }
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, output_file))
    };
    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    let finished = tokio::select! {
        res = work => res.map_err(|e| JobError::Unexpected(format!("reading yt-dlp output failed: {e}"))),
        _ = cancel.cancelled() => Err(JobError::Cancelled),
        _ = deadline => Err(JobError::TimedOut(timeout.unwrap_or_default())),
    };

    let (status, output_file) = match finished {
        Ok(done) => done,
        Err(err) => {
            if let Err(kill_err) = child.kill().await {
                warn!("failed to kill yt-dlp: {kill_err}");
            }
            stderr_task.abort();
            return Err(err);
        }
    };

    let stderr = match stderr_task.await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).trim().to_string(),
        _ => String::new(),
    };

    if status.success() {
        Ok(JobSuccess { output_file })
    } else {
        Err(JobError::ProcessFailure {
            code: status.code(),
            stderr: if stderr.is_empty() {
                "Unknown error".to_string()
            } else {
                stderr
            },
        })
    }
}

#[cfg(windows)]
fn configure_for_background(cmd: &mut Command) {
    // Keep a console window from popping up for every download.
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn configure_for_background(_cmd: &mut Command) {}
