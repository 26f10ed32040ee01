//! Shared slot-table state for the two worker loops.
//!
//! All mutable pipeline state lives behind exactly two mutexes, one per
//! slot array. A decision and the mutation it justifies always happen in
//! one critical section — a loop never re-derives a slot's state after
//! dropping the lock. The only code path that holds both locks is the
//! flush/seek rendezvous, which always acquires input before output.

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use vpost_common::{
    FrameFlags, FrameHandle, PipelineConfig, RetireFn, TimestampUs,
};

use crate::gate::WakeGate;
use crate::slot::{SlotRing, SlotStatus};

/// Outcome of a feeder load attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Frame accepted; the retirement callback will fire once.
    Loaded,
    /// Backpressure: no free slot at the load point. Retry after the
    /// consumer recycles or the pipeline makes progress; not an error.
    NoFreeSlot,
    /// Timestamp is not after the previously loaded frame's. The feeder
    /// should route this frame around the pipeline.
    TimestampRewind,
}

/// Input-array state, all guarded by `Shared::input`.
pub(crate) struct InputState {
    pub ring: SlotRing,
    /// Next slot the feeder fills.
    pub load_point: usize,
    /// Next slot the submit loop pushes to the engine.
    pub submit_cursor: usize,
    /// Next slot the harvest loop retires.
    pub retire_cursor: usize,

    /// Stream signaled end-of-stream.
    pub eos: bool,
    /// Coordinator requested a drain.
    pub seek_pending: bool,
    /// The one-shot drain sentinel has been emitted; the submit loop
    /// parks until reset.
    pub end_emitted: bool,
    /// The submit loop holds a claim on the slot at `submit_cursor` while
    /// it talks to the engine outside the locks. The coordinator treats
    /// this as hardware-owned work.
    pub submit_in_flight: bool,
    /// Cleared at start and by every drain: the first harvest afterwards
    /// retires no input slot (one-frame pipeline latency).
    pub retire_primed: bool,
    /// A flush has been requested and not yet completed.
    pub flush_in_progress: bool,
    /// Fatal engine failure; mirrored in `OutputState::fault`.
    pub fault: bool,

    /// Monotonicity guard for incoming timestamps.
    pub last_timestamp: TimestampUs,

    // Per-run accounting (reset with the cursors).
    pub loaded_total: u64,
    pub submitted_total: u64,
    pub retired_total: u64,
    /// Lifetime count, survives resets.
    pub lifetime_loaded: u64,
}

impl InputState {
    fn new(capacity: usize) -> Self {
        Self {
            ring: SlotRing::new(capacity),
            load_point: 0,
            submit_cursor: 0,
            retire_cursor: 0,
            eos: false,
            seek_pending: false,
            end_emitted: false,
            submit_in_flight: false,
            retire_primed: false,
            flush_in_progress: false,
            fault: false,
            last_timestamp: TimestampUs::NONE,
            loaded_total: 0,
            submitted_total: 0,
            retired_total: 0,
            lifetime_loaded: 0,
        }
    }

    /// Fill the slot at the load point, if it is free.
    ///
    /// On rejection the callback is dropped unfired — the frame never
    /// entered the pipeline and the feeder keeps ownership.
    pub fn try_load(
        &mut self,
        payload: FrameHandle,
        timestamp_us: TimestampUs,
        flags: FrameFlags,
        on_retired: RetireFn,
    ) -> LoadOutcome {
        if timestamp_us.is_set()
            && self.last_timestamp.is_set()
            && timestamp_us <= self.last_timestamp
        {
            return LoadOutcome::TimestampRewind;
        }

        let point = self.load_point;
        let slot = self.ring.slot_mut(point);
        if slot.status != SlotStatus::Free {
            return LoadOutcome::NoFreeSlot;
        }

        slot.status = SlotStatus::Loaded;
        slot.payload = Some(payload);
        slot.timestamp_us = timestamp_us;
        slot.flags = flags;
        slot.on_retired = Some(on_retired);

        self.load_point = self.ring.wrap(point + 1);
        self.loaded_total += 1;
        self.lifetime_loaded += 1;
        self.last_timestamp = timestamp_us;
        LoadOutcome::Loaded
    }

    /// Release every READY slot back to FREE, collecting the retirement
    /// callbacks for the caller to fire outside the lock.
    pub fn release_ready(&mut self) -> Vec<(RetireFn, FrameHandle)> {
        let mut released = Vec::new();
        for slot in self.ring.iter_mut() {
            if slot.status == SlotStatus::Ready {
                if let Some(pair) = slot.clear_release_payload() {
                    released.push(pair);
                }
            }
        }
        released
    }

    /// True if the engine currently owns any input frame.
    pub fn hardware_busy(&self) -> bool {
        self.submit_in_flight || self.ring.count_status(SlotStatus::Processing) > 0
    }
}

/// Output-array state, all guarded by `Shared::output`.
pub(crate) struct OutputState {
    pub ring: SlotRing,
    /// Next slot the submit loop claims for the engine.
    pub submit_cursor: usize,
    /// Next slot the harvest loop completes.
    pub harvest_cursor: usize,
    /// Next slot the consumer poll inspects.
    pub deliver_cursor: usize,

    /// The drain sentinel has been consumed.
    pub drained: bool,
    /// Mirror of `InputState::seek_pending`, set under this lock by the
    /// coordinator. While set, harvested batches are discarded straight
    /// to FREE — the seek throws them away anyway, and the drain
    /// sentinel needs a free slot to land in.
    pub seek_pending: bool,
    /// Fatal engine failure; mirrored in `InputState::fault`.
    pub fault: bool,

    // Per-run accounting (reset with the cursors).
    pub claimed_slots: u64,
    pub harvested_slots: u64,
    pub delivered_total: u64,
    pub recycled_total: u64,
}

impl OutputState {
    fn new(payloads: &[FrameHandle]) -> Self {
        Self {
            ring: SlotRing::with_payloads(payloads),
            submit_cursor: 0,
            harvest_cursor: 0,
            deliver_cursor: 0,
            drained: false,
            seek_pending: false,
            fault: false,
            claimed_slots: 0,
            harvested_slots: 0,
            delivered_total: 0,
            recycled_total: 0,
        }
    }
}

/// Everything the loops, the coordinator, and the public API share.
///
/// Lock order: `input` before `output`, and only the coordinator takes
/// both. Each gate is its own lock domain and is never held while a slot
/// lock is taken.
pub(crate) struct Shared {
    pub input: Mutex<InputState>,
    pub output: Mutex<OutputState>,
    /// Parks the submit loop.
    pub submit_gate: WakeGate,
    /// Parks the harvest loop.
    pub harvest_gate: WakeGate,
    /// Paired with the `output` mutex; signaled when the drain sentinel
    /// is consumed (or a fault interrupts the drain).
    pub drain_cond: Condvar,
    pub config: PipelineConfig,
}

impl Shared {
    pub fn new(config: PipelineConfig, output_payloads: &[FrameHandle]) -> Self {
        Self {
            input: Mutex::new(InputState::new(config.input_slots)),
            output: Mutex::new(OutputState::new(output_payloads)),
            submit_gate: WakeGate::new(),
            harvest_gate: WakeGate::new(),
            drain_cond: Condvar::new(),
            config,
        }
    }

    /// Publish a fatal engine failure and wake everyone who could be
    /// waiting on progress that will never come.
    pub fn raise_fault(&self) {
        self.input.lock().fault = true;
        {
            let mut output = self.output.lock();
            output.fault = true;
            self.drain_cond.notify_all();
        }
        self.submit_gate.notify();
        self.harvest_gate.notify();
    }

    /// The RESET step of the rendezvous: retire every non-FREE slot,
    /// zero all cursors, clear the stream latches. Both locks must be
    /// held and the engine must be idle.
    ///
    /// Input slots may still read PROCESSING here — after a completed
    /// drain the final batch's inputs were never retired (the one-batch
    /// retirement lag) — but the drain guarantees the hardware is done
    /// with them, so they are reclaimed like everything else.
    ///
    /// Returns the retirement callbacks to fire after the locks drop.
    pub fn reset_locked(
        &self,
        input: &mut InputState,
        output: &mut OutputState,
    ) -> Vec<(RetireFn, FrameHandle)> {
        debug_assert!(!input.submit_in_flight, "reset with a submit in flight");
        debug_assert_eq!(
            output.ring.count_status(SlotStatus::Processing),
            0,
            "reset with hardware-owned output"
        );

        let mut released = Vec::new();
        for slot in input.ring.iter_mut() {
            if slot.status != SlotStatus::Free {
                if let Some(pair) = slot.clear_release_payload() {
                    released.push(pair);
                }
            }
        }
        for slot in output.ring.iter_mut() {
            if slot.status != SlotStatus::Free {
                slot.clear_keep_payload();
            }
        }

        input.load_point = 0;
        input.submit_cursor = 0;
        input.retire_cursor = 0;
        input.eos = false;
        input.seek_pending = false;
        input.end_emitted = false;
        input.retire_primed = false;
        input.last_timestamp = TimestampUs::NONE;
        input.loaded_total = 0;
        input.submitted_total = 0;
        input.retired_total = 0;

        output.submit_cursor = 0;
        output.harvest_cursor = 0;
        output.deliver_cursor = 0;
        output.drained = false;
        output.seek_pending = false;
        output.claimed_slots = 0;
        output.harvested_slots = 0;
        output.delivered_total = 0;
        output.recycled_total = 0;

        debug!(retired = released.len(), "slot table reset");
        released
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use vpost_common::{EngineCaps, FilterSelection, FrcRate, VideoInfo};

    fn test_config() -> PipelineConfig {
        let caps = EngineCaps {
            forward_reference_depth: 0,
            frc_rate: FrcRate::X1,
            filters: FilterSelection::default(),
        };
        PipelineConfig::derive(VideoInfo::new(1280, 720, 25), caps).unwrap()
    }

    fn shared() -> Shared {
        let config = test_config();
        let payloads: Vec<FrameHandle> =
            (0..config.output_slots as u64).map(|i| FrameHandle(100 + i)).collect();
        Shared::new(config, &payloads)
    }

    #[test]
    fn load_advances_point_and_rejects_busy_slot() {
        let s = shared();
        let mut input = s.input.lock();
        let capacity = input.ring.capacity();

        for i in 0..capacity as u64 {
            let outcome = input.try_load(
                FrameHandle(i),
                TimestampUs(i as i64 * 1000),
                FrameFlags::NONE,
                Box::new(|_| {}),
            );
            assert_eq!(outcome, LoadOutcome::Loaded);
        }

        // Ring is full of LOADED slots; the next load hits a busy slot.
        let outcome = input.try_load(
            FrameHandle(99),
            TimestampUs(99_000),
            FrameFlags::NONE,
            Box::new(|_| {}),
        );
        assert_eq!(outcome, LoadOutcome::NoFreeSlot);
        assert_eq!(input.loaded_total, capacity as u64);
    }

    #[test]
    fn load_rejects_timestamp_rewind() {
        let s = shared();
        let mut input = s.input.lock();

        let outcome =
            input.try_load(FrameHandle(1), TimestampUs(2000), FrameFlags::NONE, Box::new(|_| {}));
        assert_eq!(outcome, LoadOutcome::Loaded);

        // Equal and earlier timestamps are both rewinds.
        let outcome =
            input.try_load(FrameHandle(2), TimestampUs(2000), FrameFlags::NONE, Box::new(|_| {}));
        assert_eq!(outcome, LoadOutcome::TimestampRewind);
        let outcome =
            input.try_load(FrameHandle(3), TimestampUs(500), FrameFlags::NONE, Box::new(|_| {}));
        assert_eq!(outcome, LoadOutcome::TimestampRewind);
        assert_eq!(input.loaded_total, 1);
    }

    #[test]
    fn release_ready_fires_only_ready_slots() {
        let s = shared();
        let mut input = s.input.lock();
        input.try_load(FrameHandle(1), TimestampUs(1000), FrameFlags::NONE, Box::new(|_| {}));
        input.try_load(FrameHandle(2), TimestampUs(2000), FrameFlags::NONE, Box::new(|_| {}));

        input.ring.slot_mut(0).status = SlotStatus::Ready;
        let released = input.release_ready();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].1, FrameHandle(1));
        assert_eq!(input.ring.slot(0).status, SlotStatus::Free);
        assert_eq!(input.ring.slot(1).status, SlotStatus::Loaded);
    }

    #[test]
    fn reset_clears_slots_cursors_and_latches() {
        let s = shared();
        let mut input = s.input.lock();
        let mut output = s.output.lock();

        input.try_load(FrameHandle(1), TimestampUs(1000), FrameFlags::NONE, Box::new(|_| {}));
        input.eos = true;
        input.end_emitted = true;
        input.retire_primed = true;
        output.ring.slot_mut(0).status = SlotStatus::Ready;
        output.submit_cursor = 1;
        output.drained = true;

        let released = s.reset_locked(&mut input, &mut output);
        assert_eq!(released.len(), 1, "loaded input retired");

        assert_eq!(input.load_point, 0);
        assert!(!input.eos && !input.end_emitted && !input.retire_primed);
        assert_eq!(input.ring.count_status(SlotStatus::Free), input.ring.capacity());
        assert_eq!(output.submit_cursor, 0);
        assert!(!output.drained);
        assert_eq!(output.ring.count_status(SlotStatus::Free), output.ring.capacity());
        // Output payload bindings survive the reset.
        assert!(output.ring.slot(0).payload.is_some());
    }

    #[test]
    fn hardware_busy_tracks_processing_and_in_flight() {
        let s = shared();
        let mut input = s.input.lock();
        assert!(!input.hardware_busy());

        input.submit_in_flight = true;
        assert!(input.hardware_busy());
        input.submit_in_flight = false;

        input.ring.slot_mut(1).status = SlotStatus::Processing;
        assert!(input.hardware_busy());
    }
}
