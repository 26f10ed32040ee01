//! Software reference engine.
//!
//! Implements the [`PostEngine`] contract without touching pixel data:
//! payload handles are opaque, so the software path's job is to honor the
//! *scheduling* contract exactly — strict FIFO batches, forward-reference
//! warm-up, conversion-ratio fan-out accounting, and a harvest call that
//! genuinely blocks until the batch is "done". Output surfaces pass
//! through to the sink unmodified.
//!
//! An optional simulated processing latency makes the blocking window
//! real, which the concurrency tests use to force harvest-side waits.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use vpost_common::{
    EngineCaps, EngineError, FilterSelection, FrameFlags, FrameHandle, FrcRate, PostEngine,
    VideoInfo,
};

/// One submitted, not-yet-harvested batch.
struct PendingBatch {
    outputs: Vec<FrameHandle>,
    ready_at: Instant,
    end_of_stream: bool,
}

#[derive(Default)]
struct EngineState {
    caps: Option<EngineCaps>,
    /// Batches submitted since start/reset.
    submit_index: u64,
    /// Batches harvested since start/reset.
    harvest_index: u64,
    pending: VecDeque<PendingBatch>,
}

/// Deterministic software implementation of [`PostEngine`].
///
/// Construction knobs exist for tests: a forward-reference depth to
/// exercise warm-up behavior and a per-batch latency to exercise the
/// blocking harvest path. Defaults are zero for both, which is also what
/// the pass-through production fallback wants.
pub struct SoftwareEngine {
    state: Mutex<EngineState>,
    batch_done: Condvar,
    reference_depth: u32,
    latency: Duration,
}

impl SoftwareEngine {
    pub fn new() -> Self {
        Self::with_options(0, Duration::ZERO)
    }

    /// Engine that pretends to need `reference_depth` frames of context
    /// before output becomes harvestable.
    pub fn with_reference_depth(reference_depth: u32) -> Self {
        Self::with_options(reference_depth, Duration::ZERO)
    }

    /// Engine whose batches only complete `latency` after submission.
    pub fn with_latency(latency: Duration) -> Self {
        Self::with_options(0, latency)
    }

    pub fn with_options(reference_depth: u32, latency: Duration) -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            batch_done: Condvar::new(),
            reference_depth,
            latency,
        }
    }

    fn frc_rate(state: &EngineState) -> FrcRate {
        state.caps.map(|c| c.frc_rate).unwrap_or_default()
    }
}

impl Default for SoftwareEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PostEngine for SoftwareEngine {
    fn configure(&self, info: &VideoInfo) -> Result<EngineCaps, EngineError> {
        info.validate()
            .map_err(|e| EngineError::Unsupported(e.to_string()))?;

        let frc_rate = FrcRate::from_input_fps(info.fps);
        let caps = EngineCaps {
            forward_reference_depth: self.reference_depth,
            frc_rate,
            filters: FilterSelection::for_stream(info, frc_rate),
        };

        let mut state = self.state.lock();
        state.caps = Some(caps);
        info!(
            width = info.width,
            height = info.height,
            fps = info.fps,
            frc = %frc_rate,
            references = self.reference_depth,
            "software engine configured"
        );
        Ok(caps)
    }

    fn submit(
        &self,
        input: Option<FrameHandle>,
        outputs: &[FrameHandle],
        end_of_stream: bool,
        flags: FrameFlags,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        let caps = state.caps.ok_or(EngineError::NotConfigured)?;

        if end_of_stream {
            if input.is_some() || outputs.len() != 1 {
                return Err(EngineError::Submit(
                    "drain submit takes no input and exactly one output".into(),
                ));
            }
        } else {
            let expected = caps.frc_rate.batch_len_at(state.submit_index) as usize;
            if input.is_none() {
                return Err(EngineError::Submit("missing input frame".into()));
            }
            if outputs.len() != expected {
                return Err(EngineError::Submit(format!(
                    "batch {} expects {} outputs, got {}",
                    state.submit_index,
                    expected,
                    outputs.len()
                )));
            }
        }

        debug!(
            input = ?input,
            outputs = outputs.len(),
            end_of_stream,
            flags = ?flags,
            index = state.submit_index,
            "submit"
        );

        state.pending.push_back(PendingBatch {
            outputs: outputs.to_vec(),
            ready_at: Instant::now() + self.latency,
            end_of_stream,
        });
        state.submit_index += 1;
        self.batch_done.notify_all();
        Ok(())
    }

    fn harvest(&self, outputs: &[FrameHandle]) -> Result<(), EngineError> {
        let mut state = self.state.lock();

        let front = state
            .pending
            .front()
            .ok_or_else(|| EngineError::Harvest("no batch in flight".into()))?;
        if front.outputs != outputs {
            return Err(EngineError::Harvest(format!(
                "harvest out of order: expected {:?}, got {:?}",
                front.outputs, outputs
            )));
        }

        // Block until the batch's simulated completion time.
        let ready_at = front.ready_at;
        while Instant::now() < ready_at {
            if self.batch_done.wait_until(&mut state, ready_at).timed_out() {
                break;
            }
        }

        let batch = state.pending.pop_front().expect("front checked above");
        state.harvest_index += 1;
        debug!(
            outputs = batch.outputs.len(),
            end_of_stream = batch.end_of_stream,
            index = state.harvest_index - 1,
            "harvest complete"
        );
        Ok(())
    }

    fn submit_batch_len(&self) -> u32 {
        let state = self.state.lock();
        Self::frc_rate(&state).batch_len_at(state.submit_index)
    }

    fn harvest_batch_len(&self) -> u32 {
        let state = self.state.lock();
        if state.submit_index >= self.reference_depth as u64 {
            Self::frc_rate(&state).batch_len_at(state.harvest_index)
        } else {
            0
        }
    }

    fn reset(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        let dropped = state.pending.len();
        state.pending.clear();
        state.submit_index = 0;
        state.harvest_index = 0;
        info!(dropped, "software engine reset");
        Ok(())
    }
}

impl std::fmt::Debug for SoftwareEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SoftwareEngine")
            .field("configured", &state.caps.is_some())
            .field("submit_index", &state.submit_index)
            .field("harvest_index", &state.harvest_index)
            .field("pending", &state.pending.len())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
