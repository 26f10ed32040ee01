//! Flush/seek rendezvous.
//!
//! The protocol runs IDLE → SEEK_REQUESTED → DRAINING → RESET → IDLE.
//! The hardware may hold references to buffers mid-transform, so slot
//! state is never reset while the engine owns work: the entry step
//! reclaims everything the hardware does *not* own, the drain waits for
//! the sentinel to flush the device FIFO, and only then does RESET
//! reclaim the remainder and zero the cursors.

use std::sync::Arc;

use tracing::{debug, info};

use vpost_common::{FrameHandle, PipelineError, PipelineResult, PostEngine, RetireFn};

use crate::slot::SlotStatus;
use crate::table::Shared;

/// How a flush request resolved.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was hardware-owned; the table was reset synchronously.
    Immediate,
    /// In-flight work exists; call `await_flush_complete` to block until
    /// the drain finishes and the table is reset.
    Draining,
}

/// SEEK_REQUESTED: reclaim what the hardware does not own and decide
/// whether a drain is needed.
pub(crate) fn request_flush(
    shared: &Shared,
    engine: &Arc<dyn PostEngine>,
) -> PipelineResult<FlushOutcome> {
    let mut released: Vec<(RetireFn, FrameHandle)> = Vec::new();
    let mut reset_err = None;
    let outcome = {
        let mut input = shared.input.lock();
        if input.fault {
            return Err(PipelineError::Faulted);
        }
        let mut output = shared.output.lock();

        // Reclaim slots the engine has no stake in. The slot the submit
        // loop has claimed for an outstanding engine call is off limits,
        // as is anything PROCESSING or the pending drain sentinel.
        let claimed = input.submit_in_flight.then_some(input.submit_cursor);
        for (idx, slot) in input.ring.iter_mut().enumerate() {
            if Some(idx) == claimed {
                continue;
            }
            if matches!(slot.status, SlotStatus::Loaded | SlotStatus::Ready) {
                if let Some(pair) = slot.clear_release_payload() {
                    released.push(pair);
                }
            }
        }
        for slot in output.ring.iter_mut() {
            if matches!(slot.status, SlotStatus::Ready | SlotStatus::Rendering) {
                slot.clear_keep_payload();
            }
        }

        let draining = input.hardware_busy()
            || output.ring.count_status(SlotStatus::Processing) > 0
            || (input.end_emitted && !output.drained);

        if draining {
            input.seek_pending = true;
            output.seek_pending = true;
            input.flush_in_progress = true;
            debug!("flush requested, drain needed");
            FlushOutcome::Draining
        } else {
            // No-op reset: nothing in flight, so the whole table can be
            // cleared right here. The engine's batch indices may still be
            // mid-stream; re-arm them under the locks, before any new
            // load can reach a worker loop.
            released.extend(shared.reset_locked(&mut input, &mut output));
            reset_err = engine.reset().err();
            debug!("flush requested, no in-flight work");
            FlushOutcome::Immediate
        }
    };

    match outcome {
        FlushOutcome::Draining => {
            // Wake both loops: submit to emit the sentinel, harvest to
            // chase it.
            shared.submit_gate.notify();
            shared.harvest_gate.notify();
        }
        FlushOutcome::Immediate => {
            shared.submit_gate.notify();
        }
    }

    for (cb, payload) in released {
        cb(payload);
    }
    if let Some(e) = reset_err {
        shared.raise_fault();
        return Err(PipelineError::Engine(e));
    }
    Ok(outcome)
}

/// DRAINING → RESET: block until the sentinel is consumed, then reset
/// the table, the cursors, and the engine, and resume both loops.
pub(crate) fn await_flush_complete(
    shared: &Shared,
    engine: &Arc<dyn PostEngine>,
) -> PipelineResult<()> {
    {
        let input = shared.input.lock();
        if input.fault {
            return Err(PipelineError::Faulted);
        }
        if !input.flush_in_progress {
            // Either never requested or it resolved immediately.
            return Ok(());
        }
    }

    {
        let mut output = shared.output.lock();
        loop {
            if output.fault {
                return Err(PipelineError::Faulted);
            }
            if output.drained {
                break;
            }
            shared.drain_cond.wait(&mut output);
        }
    }

    // Both loops are parked now: submit behind the end-emitted latch,
    // harvest with nothing PROCESSING at its cursor. The engine can be
    // re-armed before the table opens for business again.
    engine.reset().map_err(|e| {
        shared.raise_fault();
        PipelineError::Engine(e)
    })?;

    let released = {
        let mut input = shared.input.lock();
        let mut output = shared.output.lock();
        let released = shared.reset_locked(&mut input, &mut output);
        input.flush_in_progress = false;
        released
    };

    shared.submit_gate.notify();
    shared.harvest_gate.notify();

    for (cb, payload) in released {
        cb(payload);
    }
    info!("flush complete");
    Ok(())
}
