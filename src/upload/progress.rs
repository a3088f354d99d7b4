use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::RngExt;
use tokio::time;

use crate::upload::queue::UploadQueue;
use crate::upload::types::TaskId;

/// Interval of the synthetic ramp ticker.
const SYNTHETIC_TICK: Duration = Duration::from_millis(300);
/// Ceiling the synthetic ramp will not cross on its own; the remaining
/// distance belongs to real transport events and the finish ramp.
const SYNTHETIC_CEILING: u8 = 80;
/// Step and delay of the deterministic finish ramp, which also keeps
/// the 100% state on screen briefly instead of flashing.
const FINISH_STEP: u8 = 5;
const FINISH_DELAY: Duration = Duration::from_millis(20);

#[derive(Default)]
struct MergeState {
    synthetic: u8,
    real: u8,
    emitted: u8,
    finished: bool,
}

/// Fuses the synthetic ramp with real transfer progress for one task.
///
/// Both inputs only move forward, real events raise the synthetic
/// baseline, and the merger only ever hands the queue
/// `max(synthetic, real)` when it exceeds what was emitted before, so
/// the stream a task observer sees is non-decreasing regardless of how
/// the two signals interleave.
#[derive(Clone)]
pub(crate) struct ProgressMerger {
    queue: UploadQueue,
    id: TaskId,
    state: Arc<Mutex<MergeState>>,
}

impl ProgressMerger {
    pub fn new(queue: UploadQueue, id: TaskId) -> Self {
        Self {
            queue,
            id,
            state: Arc::new(Mutex::new(MergeState::default())),
        }
    }

    /// Advance the synthetic ramp by one randomized step (3 to 13
    /// points), staying at or below the soft ceiling.
    pub fn on_tick(&self) {
        let next = {
            let mut state = self.state.lock().unwrap();
            if state.finished || state.synthetic >= SYNTHETIC_CEILING {
                return;
            }
            let step: u8 = rand::rng().random_range(3..=13);
            state.synthetic = (state.synthetic + step).min(SYNTHETIC_CEILING);
            Self::merged(&mut state)
        };
        if let Some(pct) = next {
            self.queue.set_progress(self.id, pct);
        }
    }

    /// Feed a real transport progress report (0..=100).
    pub fn on_real_progress(&self, pct: u8) {
        let next = {
            let mut state = self.state.lock().unwrap();
            if state.finished {
                return;
            }
            let pct = pct.min(100);
            if pct > state.real {
                state.real = pct;
            }
            // raise the baseline so later ticks continue from here
            if state.real > state.synthetic {
                state.synthetic = state.real;
            }
            Self::merged(&mut state)
        };
        if let Some(pct) = next {
            self.queue.set_progress(self.id, pct);
        }
    }

    fn merged(state: &mut MergeState) -> Option<u8> {
        let next = state.synthetic.max(state.real);
        if next > state.emitted {
            state.emitted = next;
            Some(next)
        } else {
            None
        }
    }

    /// Stop the ticker and walk the bar from the last emitted value to
    /// 100 before success is signalled.
    pub async fn finish(&self) {
        let mut current = {
            let mut state = self.state.lock().unwrap();
            state.finished = true;
            state.emitted
        };
        while current < 100 {
            current = current.saturating_add(FINISH_STEP).min(100);
            self.queue.set_progress(self.id, current);
            time::sleep(FINISH_DELAY).await;
        }
    }

    /// A failure ends the stream immediately; nothing further is
    /// emitted for this task.
    pub fn fail(&self) {
        self.state.lock().unwrap().finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().unwrap().finished
    }
}

/// Drives the synthetic ramp until the task finishes or leaves the
/// uploading state (including removal mid-flight).
pub(crate) async fn run_ticker(merger: ProgressMerger) {
    let mut interval = time::interval(SYNTHETIC_TICK);
    // the first tick of a tokio interval completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        if merger.is_finished() || !merger.queue.is_uploading(merger.id) {
            break;
        }
        merger.on_tick();
    }
}
