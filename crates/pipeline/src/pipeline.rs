//! `PostPipeline` — the owned pipeline instance and its public API.
//!
//! Construction allocates both slot arrays (capacity fixed for the
//! pipeline's lifetime) and spawns the two worker threads. The feeder
//! and consumer entry points are safe to call from arbitrary threads:
//! media-framework callbacks land here with whatever thread identity
//! they please, and every entry point is a short critical section on one
//! of the two slot locks.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use vpost_common::{
    ConfigError, FrameFlags, FrameHandle, PipelineConfig, PipelineError, PipelineResult,
    PostEngine, RetireFn, TimestampUs,
};

use crate::coordinator::{self, FlushOutcome};
use crate::harvest::HarvestLoop;
use crate::slot::SlotStatus;
use crate::submit::SubmitLoop;
use crate::table::{LoadOutcome, Shared};

/// A processed frame handed to the consumer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OutputFrame {
    pub payload: FrameHandle,
    pub timestamp_us: TimestampUs,
    pub flags: FrameFlags,
}

/// Snapshot of pipeline progress and slot occupancy.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames accepted from the feeder since the last reset.
    pub frames_loaded: u64,
    /// Frames accepted across all resets.
    pub lifetime_loaded: u64,
    /// Frames pushed into the engine.
    pub frames_submitted: u64,
    /// Input frames fully processed (retired to READY).
    pub frames_retired: u64,
    /// Output slots completed by the engine.
    pub slots_harvested: u64,
    /// Frames handed to the consumer.
    pub frames_delivered: u64,
    /// Free slots in each array right now.
    pub input_free: usize,
    pub output_free: usize,
}

/// An explicitly constructed, explicitly owned pipeline instance.
///
/// Dropping the pipeline wakes and joins both worker threads before the
/// slot storage goes away.
pub struct PostPipeline {
    shared: Arc<Shared>,
    engine: Arc<dyn PostEngine>,
    submit_thread: Option<JoinHandle<()>>,
    harvest_thread: Option<JoinHandle<()>>,
}

impl PostPipeline {
    /// Allocate the slot arrays and start both worker loops.
    ///
    /// `output_payloads` binds one externally-allocated buffer to each
    /// output slot for the pipeline's lifetime; its length must match the
    /// negotiated `config.output_slots`.
    pub fn start(
        engine: Arc<dyn PostEngine>,
        config: PipelineConfig,
        output_payloads: Vec<FrameHandle>,
    ) -> PipelineResult<Self> {
        if output_payloads.len() != config.output_slots {
            return Err(ConfigError::PayloadCountMismatch {
                expected: config.output_slots,
                got: output_payloads.len(),
            }
            .into());
        }

        let shared = Arc::new(Shared::new(config, &output_payloads));

        let submit_thread = {
            let worker = SubmitLoop::new(Arc::clone(&shared), Arc::clone(&engine));
            thread::Builder::new()
                .name("vpost-submit".into())
                .spawn(move || worker.run())
                .map_err(|e| PipelineError::Engine(vpost_common::EngineError::Unavailable(
                    format!("spawn failed: {e}"),
                )))?
        };
        let harvest_thread = {
            let worker = HarvestLoop::new(Arc::clone(&shared), Arc::clone(&engine));
            thread::Builder::new()
                .name("vpost-harvest".into())
                .spawn(move || worker.run())
                .map_err(|e| PipelineError::Engine(vpost_common::EngineError::Unavailable(
                    format!("spawn failed: {e}"),
                )))?
        };

        info!(
            input_slots = config.input_slots,
            output_slots = config.output_slots,
            frc = %config.caps.frc_rate,
            "pipeline started"
        );

        Ok(Self {
            shared,
            engine,
            submit_thread: Some(submit_thread),
            harvest_thread: Some(harvest_thread),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    // ── Feeder interface ─────────────────────────────────────────

    /// Whether a FREE input slot exists at the load point.
    pub fn can_accept_input(&self) -> PipelineResult<bool> {
        let input = self.shared.input.lock();
        if input.fault {
            return Err(PipelineError::Faulted);
        }
        Ok(input.ring.slot(input.load_point).status == SlotStatus::Free)
    }

    /// Offer a decoded frame to the pipeline.
    ///
    /// `on_retired` fires exactly once, after the pipeline is fully done
    /// with the frame. On [`LoadOutcome::NoFreeSlot`] the caller should
    /// back off until the consumer recycles; on
    /// [`LoadOutcome::TimestampRewind`] it should route the frame around
    /// the pipeline — in both cases the callback is dropped unfired.
    pub fn load_input(
        &self,
        payload: FrameHandle,
        timestamp_us: TimestampUs,
        flags: FrameFlags,
        on_retired: RetireFn,
    ) -> PipelineResult<LoadOutcome> {
        let outcome = {
            let mut input = self.shared.input.lock();
            if input.fault {
                return Err(PipelineError::Faulted);
            }
            input.try_load(payload, timestamp_us, flags, on_retired)
        };
        if outcome == LoadOutcome::Loaded {
            self.shared.submit_gate.notify();
        }
        Ok(outcome)
    }

    /// Signal that no further input will arrive. The submit loop will
    /// emit the drain sentinel once the loaded backlog is consumed.
    pub fn notify_end_of_stream(&self) {
        {
            let mut input = self.shared.input.lock();
            input.eos = true;
        }
        info!("end of stream signaled");
        self.shared.submit_gate.notify();
    }

    // ── Flush / seek ─────────────────────────────────────────────

    /// Begin a flush. Returns [`FlushOutcome::Immediate`] when nothing
    /// was hardware-owned, otherwise [`FlushOutcome::Draining`] — follow
    /// with [`await_flush_complete`](Self::await_flush_complete).
    pub fn request_flush(&self) -> PipelineResult<FlushOutcome> {
        coordinator::request_flush(&self.shared, &self.engine)
    }

    /// Block until an in-progress drain finishes and the table is reset.
    /// No-op when no drain is in progress.
    pub fn await_flush_complete(&self) -> PipelineResult<()> {
        coordinator::await_flush_complete(&self.shared, &self.engine)
    }

    /// Synchronous flush: request and, if needed, wait for completion.
    pub fn flush(&self) -> PipelineResult<()> {
        match self.request_flush()? {
            FlushOutcome::Immediate => Ok(()),
            FlushOutcome::Draining => self.await_flush_complete(),
        }
    }

    // ── Consumer interface ───────────────────────────────────────

    /// Non-blocking check for the next processed frame.
    ///
    /// Advances the delivery cursor without changing slot status; the
    /// slot stays READY until [`acquire_output`](Self::acquire_output)
    /// claims it or a flush reclaims it. Also releases fully-processed
    /// input frames back to the feeder (their retirement callbacks fire
    /// from here).
    ///
    /// After a fault, remaining READY frames stay deliverable; once they
    /// are drained this returns the fault and the stream must be torn
    /// down.
    pub fn poll_ready_output(&self) -> PipelineResult<Option<OutputFrame>> {
        let (frame, faulted) = {
            let mut output = self.shared.output.lock();
            let cursor = output.deliver_cursor;
            let slot = output.ring.slot(cursor);
            if slot.status == SlotStatus::Ready {
                let frame = OutputFrame {
                    payload: slot.payload.expect("output slots are always backed"),
                    timestamp_us: slot.timestamp_us,
                    flags: slot.flags,
                };
                output.deliver_cursor = output.ring.wrap(cursor + 1);
                output.delivered_total += 1;
                debug_assert!(output.delivered_total <= output.harvested_slots);
                (Some(frame), output.fault)
            } else {
                (None, output.fault)
            }
        };

        // Hand fully-processed inputs back to the feeder.
        let released = {
            let mut input = self.shared.input.lock();
            input.release_ready()
        };
        for (cb, payload) in released {
            cb(payload);
        }

        match frame {
            Some(f) => Ok(Some(f)),
            None if faulted => Err(PipelineError::Faulted),
            None => Ok(None),
        }
    }

    /// Take ownership of a delivered frame for scan-out
    /// (READY → RENDERING). Returns false if the slot is no longer READY
    /// (e.g. a flush reclaimed it).
    pub fn acquire_output(&self, payload: FrameHandle) -> bool {
        let mut output = self.shared.output.lock();
        match output.ring.position_of(payload) {
            Some(idx) => output.ring.slot_mut(idx).transition(
                &[SlotStatus::Ready],
                SlotStatus::Rendering,
            ),
            None => false,
        }
    }

    /// Return a frame's slot to the pipeline (READY/RENDERING → FREE)
    /// and wake the submit loop. Recycling an already-FREE slot is a
    /// no-op and returns false.
    pub fn recycle_output(&self, payload: FrameHandle) -> bool {
        let recycled = {
            let mut output = self.shared.output.lock();
            let Some(idx) = output.ring.position_of(payload) else {
                warn!(%payload, "recycle of unknown payload");
                return false;
            };
            let slot = output.ring.slot_mut(idx);
            match slot.status {
                SlotStatus::Ready | SlotStatus::Rendering => {
                    slot.clear_keep_payload();
                    output.recycled_total += 1;
                    true
                }
                SlotStatus::Free => false,
                other => {
                    // Recycling a hardware-owned slot is a consumer bug.
                    debug_assert!(false, "recycle of slot in {other:?}");
                    warn!(%payload, status = ?other, "recycle of slot not owned by consumer");
                    false
                }
            }
        };
        if recycled {
            self.shared.submit_gate.notify();
        }
        recycled
    }

    // ── Introspection ────────────────────────────────────────────

    pub fn stats(&self) -> PipelineStats {
        // The two locks are taken one after the other, never together;
        // the snapshot is only as atomic as two lock acquisitions, which
        // is all introspection needs.
        let mut stats = PipelineStats::default();
        {
            let input = self.shared.input.lock();
            stats.frames_loaded = input.loaded_total;
            stats.lifetime_loaded = input.lifetime_loaded;
            stats.frames_submitted = input.submitted_total;
            stats.frames_retired = input.retired_total;
            stats.input_free = input.ring.count_status(SlotStatus::Free);
        }
        {
            let output = self.shared.output.lock();
            stats.slots_harvested = output.harvested_slots;
            stats.frames_delivered = output.delivered_total;
            stats.output_free = output.ring.count_status(SlotStatus::Free);
        }
        stats
    }

    /// Whether a fatal engine failure stopped the pipeline.
    pub fn is_faulted(&self) -> bool {
        self.shared.input.lock().fault
    }
}

impl Drop for PostPipeline {
    fn drop(&mut self) {
        debug!("pipeline teardown");
        // Wake both loops before joining: a parked loop that is never
        // signaled would deadlock the join.
        self.shared.submit_gate.request_exit();
        self.shared.harvest_gate.request_exit();
        if let Some(handle) = self.submit_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.harvest_thread.take() {
            let _ = handle.join();
        }

        // With both loops gone, hand every still-tracked input frame back
        // to the feeder so no retirement notification is lost.
        let released = {
            let mut input = self.shared.input.lock();
            let mut released = Vec::new();
            for slot in input.ring.iter_mut() {
                if slot.status != SlotStatus::Free {
                    if let Some(pair) = slot.clear_release_payload() {
                        released.push(pair);
                    }
                }
            }
            released
        };
        for (cb, payload) in released {
            cb(payload);
        }

        info!(lifetime_loaded = self.shared.input.lock().lifetime_loaded, "pipeline stopped");
    }
}

impl std::fmt::Debug for PostPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (input_ring, fault) = {
            let input = self.shared.input.lock();
            (format!("{:?}", input.ring), input.fault)
        };
        let output_ring = {
            let output = self.shared.output.lock();
            format!("{:?}", output.ring)
        };
        f.debug_struct("PostPipeline")
            .field("input", &input_ring)
            .field("output", &output_ring)
            .field("fault", &fault)
            .finish()
    }
}
