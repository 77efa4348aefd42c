use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Stage of a module job, as shown by the UI.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Listing,
    Downloading,
    Extracting,
    Installing,
    Restoring,
    Cleaning,
    Finalizing,
}

/// Payload pushed to the UI layer while a job runs.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Step {
        folder: String,
        phase: Phase,
        step: usize,
        total: usize,
        message: String,
    },
    TransferStarted {
        url: String,
        total_bytes: Option<u64>,
    },
    TransferProgress {
        url: String,
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
        bytes_per_sec: f64,
    },
    TransferFinished {
        url: String,
        downloaded_bytes: u64,
    },
}

/// Sending half of the progress channel. A disabled sink or a dropped receiver
/// silently discards events.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Numbered steps of one job. The total is an estimate and may be revised mid-job.
#[derive(Debug, Clone)]
pub struct StepTracker {
    sink: ProgressSink,
    folder: String,
    step: usize,
    total: usize,
}

impl StepTracker {
    pub fn new(sink: ProgressSink, folder: &str, total: usize) -> Self {
        Self {
            sink,
            folder: folder.to_string(),
            step: 0,
            total: total.max(1),
        }
    }

    pub fn sink(&self) -> &ProgressSink {
        &self.sink
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Re-estimates the total as the steps done so far plus `remaining`.
    pub fn set_remaining(&mut self, remaining: usize) {
        self.total = (self.step + remaining).max(1);
    }

    pub fn begin(&mut self, phase: Phase, message: impl Into<String>) {
        self.step += 1;
        if self.step > self.total {
            self.total = self.step;
        }
        self.sink.emit(ProgressEvent::Step {
            folder: self.folder.clone(),
            phase,
            step: self.step,
            total: self.total,
            message: message.into(),
        });
    }
}

/// Smoothed transfer rate: an exponential moving average over instantaneous byte/s
/// samples taken at least `min_interval` apart.
#[derive(Debug, Clone)]
pub struct RateEstimator {
    alpha: f64,
    min_interval: Duration,
    last_at: Instant,
    last_bytes: u64,
    smoothed: Option<f64>,
}

impl RateEstimator {
    pub const DEFAULT_ALPHA: f64 = 0.3;

    pub fn new(min_interval: Duration, started_at: Instant) -> Self {
        Self {
            alpha: Self::DEFAULT_ALPHA,
            min_interval,
            last_at: started_at,
            last_bytes: 0,
            smoothed: None,
        }
    }

    /// Feeds the running byte count. Returns the new smoothed rate when a sample was
    /// taken, `None` while inside the minimum interval.
    pub fn sample(&mut self, downloaded: u64, now: Instant) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.last_at);
        if elapsed < self.min_interval || elapsed.is_zero() {
            return None;
        }
        let delta = downloaded.saturating_sub(self.last_bytes) as f64;
        let instant_rate = delta / elapsed.as_secs_f64();
        let next = match self.smoothed {
            Some(previous) => self.alpha * instant_rate + (1.0 - self.alpha) * previous,
            None => instant_rate,
        };
        self.smoothed = Some(next);
        self.last_at = now;
        self.last_bytes = downloaded;
        Some(next)
    }

    pub fn rate(&self) -> f64 {
        self.smoothed.unwrap_or(0.0)
    }
}
