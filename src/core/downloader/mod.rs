pub mod client;
pub mod progress;

pub use client::{file_name_from_url, DownloadOutcome, Downloader};
pub use progress::{Phase, ProgressEvent, ProgressSink, RateEstimator, StepTracker};
