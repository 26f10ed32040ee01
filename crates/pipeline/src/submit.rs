//! Submit loop: feeds loaded input frames (or the drain sentinel) into
//! the engine and claims the output slots each batch will fill.
//!
//! Each iteration is a three-phase step: decide under the input lock,
//! claim output slots under the output lock, call the engine with no lock
//! held, then commit the slot transitions. The in-flight latch set during
//! the decision keeps the coordinator from treating the claimed input
//! slot as reclaimable while the engine call is outstanding.

use std::sync::Arc;

use tracing::{debug, error, trace};

use vpost_common::{FrameFlags, FrameHandle, PostEngine, TimestampUs};

use crate::gate::StepOutcome;
use crate::slot::SlotStatus;
use crate::table::Shared;

/// One decision made under the input lock.
enum Job {
    /// Submit the loaded frame at the submit cursor.
    Frame {
        payload: FrameHandle,
        timestamp_us: TimestampUs,
        flags: FrameFlags,
    },
    /// Emit the one-shot drain sentinel.
    EndFlag,
}

pub(crate) struct SubmitLoop {
    shared: Arc<Shared>,
    engine: Arc<dyn PostEngine>,
}

impl SubmitLoop {
    pub fn new(shared: Arc<Shared>, engine: Arc<dyn PostEngine>) -> Self {
        Self { shared, engine }
    }

    pub fn run(&self) {
        debug!("submit loop running");
        loop {
            let seen = self.shared.submit_gate.observe();
            if self.shared.submit_gate.exit_requested() {
                break;
            }
            match self.step() {
                StepOutcome::Progress => {}
                StepOutcome::Park => self.shared.submit_gate.wait_while_unchanged(seen),
                StepOutcome::Stop => break,
            }
        }
        debug!("submit loop exiting");
    }

    fn step(&self) -> StepOutcome {
        // Phase 1: decide what to submit, holding the input lock.
        let job = {
            let mut input = self.shared.input.lock();
            if input.fault {
                return StepOutcome::Stop;
            }
            if input.end_emitted {
                // Sentinel is out; nothing more until the coordinator
                // resets the stream.
                return StepOutcome::Park;
            }

            let slot = input.ring.slot(input.submit_cursor);
            let (status, payload, timestamp_us, flags) =
                (slot.status, slot.payload, slot.timestamp_us, slot.flags);

            let loaded = status == SlotStatus::Loaded;
            let end = !loaded && (input.eos || input.seek_pending);

            if end {
                input.submit_in_flight = true;
                Job::EndFlag
            } else if loaded {
                let Some(payload) = payload else {
                    // A loaded slot without a payload is a slot-contract
                    // violation; fail the pipeline rather than submit
                    // garbage.
                    debug_assert!(false, "LOADED slot without payload");
                    drop(input);
                    self.shared.raise_fault();
                    return StepOutcome::Stop;
                };
                input.submit_in_flight = true;
                Job::Frame {
                    payload,
                    timestamp_us,
                    flags,
                }
            } else {
                return StepOutcome::Park;
            }
        };

        // Phase 2: claim output slots, holding the output lock.
        let needed = match job {
            Job::EndFlag => 1,
            Job::Frame { .. } => self.engine.submit_batch_len() as usize,
        };
        let outputs: Vec<FrameHandle> = {
            let output = self.shared.output.lock();
            let mut claimed = Vec::with_capacity(needed);
            for i in 0..needed {
                let slot = output.ring.slot(output.submit_cursor + i);
                if slot.status != SlotStatus::Free {
                    // Never partially commit: release the claim and wait
                    // for the consumer to recycle.
                    drop(output);
                    self.shared.input.lock().submit_in_flight = false;
                    trace!(needed, free = i, "output slots not ready");
                    return StepOutcome::Park;
                }
                claimed.push(slot.payload.expect("output slots are always backed"));
            }
            claimed
        };

        // Phase 3: engine call with no locks held.
        let result = match &job {
            Job::EndFlag => self
                .engine
                .submit(None, &outputs, true, FrameFlags::NONE),
            Job::Frame { payload, flags, .. } => {
                self.engine.submit(Some(*payload), &outputs, false, *flags)
            }
        };
        if let Err(e) = result {
            error!(error = %e, "submit failed, stopping pipeline");
            {
                self.shared.input.lock().submit_in_flight = false;
            }
            self.shared.raise_fault();
            return StepOutcome::Stop;
        }

        // Phase 4: commit the transitions.
        match job {
            Job::Frame {
                timestamp_us,
                flags,
                ..
            } => {
                {
                    let mut input = self.shared.input.lock();
                    let cursor = input.submit_cursor;
                    let slot = input.ring.slot_mut(cursor);
                    debug_assert_eq!(slot.status, SlotStatus::Loaded);
                    slot.status = SlotStatus::Processing;
                    input.submit_cursor = input.ring.wrap(cursor + 1);
                    input.submitted_total += 1;
                    input.submit_in_flight = false;
                    debug_assert!(input.submitted_total <= input.loaded_total);
                }
                {
                    let mut output = self.shared.output.lock();
                    let base = output.submit_cursor;
                    for i in 0..needed {
                        let slot = output.ring.slot_mut(base + i);
                        debug_assert_eq!(slot.status, SlotStatus::Free);
                        slot.status = SlotStatus::Processing;
                        slot.timestamp_us = timestamp_us;
                        slot.flags = flags;
                    }
                    output.submit_cursor = output.ring.wrap(base + needed);
                    output.claimed_slots += needed as u64;
                }
                trace!(outputs = needed, ts = %timestamp_us, "frame submitted");
            }
            Job::EndFlag => {
                // Latch first: once the sentinel slot is visible the
                // harvest loop may consume it and the coordinator may
                // reset immediately after — a latch written later would
                // survive the reset and park the loop for good.
                {
                    let mut input = self.shared.input.lock();
                    input.end_emitted = true;
                    input.submit_in_flight = false;
                }
                {
                    let mut output = self.shared.output.lock();
                    let cursor = output.submit_cursor;
                    let slot = output.ring.slot_mut(cursor);
                    debug_assert_eq!(slot.status, SlotStatus::Free);
                    slot.status = SlotStatus::EndFlag;
                    slot.timestamp_us = TimestampUs::NONE;
                    output.submit_cursor = output.ring.wrap(cursor + 1);
                    output.claimed_slots += 1;
                }
                debug!("drain sentinel submitted");
            }
        }
        self.shared.harvest_gate.notify();
        StepOutcome::Progress
    }
}
