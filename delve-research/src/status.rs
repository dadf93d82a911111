//! Progress reporting for one research call
//!
//! [`StatusEmitter`] sits between the orchestrator and the caller's sink. It
//! only forwards events that move forward: stages in pipeline order, progress
//! that never decreases, nothing after `complete`. A sink that reports failure
//! (a closed channel, a dropped client) cancels the emitter for good.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace};

use delve_core::{Progress, ResearchStage, ResearchStatus, StreamFrame};

/// Denominator of every progress event
pub const PROGRESS_TOTAL: u32 = 100;

/// Progress checkpoints used by the orchestrator
pub mod checkpoints {
    pub const SEARCH_STARTED: u32 = 10;
    /// Search progress runs from `SEARCH_STARTED` up to this as searchers settle
    pub const SEARCH_SETTLED: u32 = 30;
    pub const FILTERED: u32 = 40;
    pub const CHUNKED: u32 = 50;
    pub const INDEXED: u32 = 60;
    pub const ANALYSIS_STARTED: u32 = 70;
    /// Analysis progress runs up to this as passes finish
    pub const ANALYSIS_SETTLED: u32 = 95;
    pub const DONE: u32 = 100;
}

type Sink = Box<dyn Fn(ResearchStatus) -> bool + Send + Sync>;

#[derive(Debug, Default)]
struct EmitterState {
    last_stage: Option<ResearchStage>,
    last_current: u32,
    finished: bool,
}

pub struct StatusEmitter {
    sink: Option<Sink>,
    state: Mutex<EmitterState>,
    delivery: Mutex<()>,
    cancelled: AtomicBool,
}

impl std::fmt::Debug for StatusEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusEmitter")
            .field("has_sink", &self.sink.is_some())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl StatusEmitter {
    fn with_sink(sink: Option<Sink>) -> Self {
        Self {
            sink,
            state: Mutex::new(EmitterState::default()),
            delivery: Mutex::new(()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Emitter that validates ordering but delivers nothing
    pub fn silent() -> Self {
        Self::with_sink(None)
    }

    /// Deliver to a plain callback; a callback cannot signal cancellation
    pub fn from_callback<F>(callback: F) -> Self
    where
        F: Fn(ResearchStatus) + Send + Sync + 'static,
    {
        Self::with_sink(Some(Box::new(move |status| {
            callback(status);
            true
        })))
    }

    /// Deliver as stream frames; a closed receiver cancels the emitter
    pub fn from_channel(sender: UnboundedSender<StreamFrame>) -> Self {
        Self::with_sink(Some(Box::new(move |status| {
            sender.send(StreamFrame::Status(status)).is_ok()
        })))
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            debug!("Status emitter cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Last progress value that was accepted
    pub fn current(&self) -> u32 {
        self.state.lock().map(|s| s.last_current).unwrap_or(PROGRESS_TOTAL)
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().map(|s| s.finished).unwrap_or(true)
    }

    /// Forward one event. Returns whether it was accepted.
    ///
    /// The state lock is released before the sink runs, so a sink may read
    /// `current()` or `is_finished()`. The delivery lock keeps sink calls in
    /// acceptance order.
    pub fn emit(&self, stage: ResearchStage, message: impl Into<String>, current: u32) -> bool {
        if self.is_cancelled() {
            return false;
        }

        let Ok(_delivery) = self.delivery.lock() else {
            return false;
        };

        let status = {
            let Ok(mut state) = self.state.lock() else {
                return false;
            };

            let current = current.min(PROGRESS_TOTAL);
            if state.finished
                || state.last_stage.is_some_and(|last| stage < last)
                || current < state.last_current
            {
                trace!(?stage, current, "Dropping out-of-order status event");
                return false;
            }

            state.last_stage = Some(stage);
            state.last_current = current;
            state.finished = stage.is_terminal();

            ResearchStatus {
                stage,
                message: message.into(),
                progress: Progress {
                    current,
                    total: PROGRESS_TOTAL,
                },
            }
        };

        if let Some(sink) = &self.sink {
            if !sink(status) {
                self.cancel();
                return false;
            }
        }
        true
    }

    /// Terminal event; later calls are dropped
    pub fn complete(&self, message: impl Into<String>) -> bool {
        self.emit(ResearchStage::Complete, message, checkpoints::DONE)
    }
}

/// Linear progress between two checkpoints after `done` of `total` parts
pub fn interpolate(from: u32, to: u32, done: usize, total: usize) -> u32 {
    if total == 0 || to <= from {
        return to.max(from);
    }
    let span = (to - from) as usize;
    from + (span * done.min(total) / total) as u32
}
