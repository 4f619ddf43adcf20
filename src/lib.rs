//! Download job orchestration around yt-dlp: plan, run, report, remember.

// Request, format tables and history entries
pub mod model;
// Error taxonomy
pub mod error;
// External tool discovery
pub mod locator;
// Request -> yt-dlp argument vector
pub mod planner;
// yt-dlp output parsing
pub mod progress;
// Child process execution and job events
pub mod runner;
// Bounded outcome history
pub mod history;
// Single-slot job state machine
pub mod coordinator;
// File/environment settings
pub mod config;
// tracing subscriber setup
pub mod logging;

pub use coordinator::{FallbackDecision, FallbackOffer, JobCoordinator, JobObserver};
pub use model::{DownloadRequest, JobOutcome, JobStatus, MediaMode, Quality};
