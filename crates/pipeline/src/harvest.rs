//! Harvest loop: collects finished batches from the engine, publishes
//! output slots as READY, and retires the input frame that produced each
//! batch.
//!
//! The engine's sync call may block for a full device pass, so it runs
//! with no lock held; the slots involved are PROCESSING (or the drain
//! sentinel) for the whole window, and nothing else in the pipeline
//! touches slots in those states.

use std::sync::Arc;

use tracing::{debug, error, trace};

use vpost_common::{FrameHandle, PostEngine, TimestampUs};

use crate::gate::StepOutcome;
use crate::slot::SlotStatus;
use crate::table::Shared;

enum Job {
    /// Complete the `n`-slot batch at the harvest cursor.
    Batch {
        payloads: Vec<FrameHandle>,
        anchor: TimestampUs,
    },
    /// Consume the drain sentinel at the harvest cursor.
    Drain { payload: FrameHandle },
}

pub(crate) struct HarvestLoop {
    shared: Arc<Shared>,
    engine: Arc<dyn PostEngine>,
}

impl HarvestLoop {
    pub fn new(shared: Arc<Shared>, engine: Arc<dyn PostEngine>) -> Self {
        Self { shared, engine }
    }

    pub fn run(&self) {
        debug!("harvest loop running");
        loop {
            let seen = self.shared.harvest_gate.observe();
            if self.shared.harvest_gate.exit_requested() {
                break;
            }
            match self.step() {
                StepOutcome::Progress => {}
                StepOutcome::Park => self.shared.harvest_gate.wait_while_unchanged(seen),
                StepOutcome::Stop => break,
            }
        }
        debug!("harvest loop exiting");
    }

    fn step(&self) -> StepOutcome {
        // Phase 1: find a complete batch (or the sentinel) at the cursor.
        let job = {
            let output = self.shared.output.lock();
            if output.fault {
                return StepOutcome::Stop;
            }

            let cursor = output.harvest_cursor;
            if output.ring.slot(cursor).status == SlotStatus::EndFlag {
                // A single sentinel slot substitutes for a full batch,
                // whatever width the ratio function would predict.
                Job::Drain {
                    payload: output
                        .ring
                        .slot(cursor)
                        .payload
                        .expect("output slots are always backed"),
                }
            } else {
                let count = self.engine.harvest_batch_len() as usize;
                if count == 0 {
                    // Reference window still filling.
                    return StepOutcome::Park;
                }
                let mut payloads = Vec::with_capacity(count);
                for i in 0..count {
                    let slot = output.ring.slot(cursor + i);
                    if slot.status != SlotStatus::Processing {
                        // Batch not fully submitted yet.
                        trace!(expected = count, got = i, "batch incomplete");
                        return StepOutcome::Park;
                    }
                    payloads.push(slot.payload.expect("output slots are always backed"));
                }
                Job::Batch {
                    payloads,
                    anchor: output.ring.slot(cursor).timestamp_us,
                }
            }
        };

        // Phase 2: blocking sync with no locks held.
        let result = match &job {
            Job::Batch { payloads, .. } => self.engine.harvest(payloads),
            Job::Drain { payload } => self.engine.harvest(std::slice::from_ref(payload)),
        };
        if let Err(e) = result {
            error!(error = %e, "harvest failed, stopping pipeline");
            self.shared.raise_fault();
            return StepOutcome::Stop;
        }

        // Phase 3: commit.
        match job {
            Job::Batch { payloads, anchor } => {
                let count = payloads.len();
                self.retire_one_input();
                let discarded = {
                    let mut output = self.shared.output.lock();
                    let base = output.harvest_cursor;
                    let output_fps = self.shared.config.output_fps.max(1) as i64;
                    let discard = output.seek_pending;
                    for i in 0..count {
                        let slot = output.ring.slot_mut(base + i);
                        debug_assert_eq!(slot.status, SlotStatus::Processing);
                        if discard {
                            // Mid-seek: the frame is about to be thrown
                            // away, and the drain sentinel needs a free
                            // slot to land in.
                            slot.clear_keep_payload();
                        } else {
                            slot.status = SlotStatus::Ready;
                            if count > 1 {
                                // Generated frames precede their anchor:
                                // space them one output-frame period
                                // apart, counting back from the anchor.
                                // Nearest-microsecond division keeps
                                // 60fps spacing at the canonical 16667us.
                                let steps = (count - 1 - i) as i64;
                                let back =
                                    (1_000_000 * steps + output_fps / 2) / output_fps;
                                slot.timestamp_us = anchor.backdated_by(back);
                            }
                        }
                    }
                    output.harvest_cursor = output.ring.wrap(base + count);
                    output.harvested_slots += count as u64;
                    debug_assert!(output.harvested_slots <= output.claimed_slots);
                    discard
                };
                if discarded {
                    // Freed slots may be exactly what the parked submit
                    // loop needs for the sentinel.
                    self.shared.submit_gate.notify();
                }
                trace!(outputs = count, ts = %anchor, "batch harvested");
            }
            Job::Drain { .. } => {
                {
                    let mut input = self.shared.input.lock();
                    // The next harvest after a drain pairs with no input,
                    // same as the first after start.
                    input.retire_primed = false;
                }
                {
                    let mut output = self.shared.output.lock();
                    let cursor = output.harvest_cursor;
                    let slot = output.ring.slot_mut(cursor);
                    debug_assert_eq!(slot.status, SlotStatus::EndFlag);
                    slot.clear_keep_payload();
                    output.harvest_cursor = output.ring.wrap(cursor + 1);
                    output.harvested_slots += 1;
                    output.drained = true;
                    // Signaled under the same lock the waiter holds.
                    self.shared.drain_cond.notify_all();
                }
                debug!("drain sentinel consumed");
            }
        }
        StepOutcome::Progress
    }

    /// Retire the input slot paired with the batch just harvested.
    ///
    /// The first batch after start (or after a drain) has no pairing —
    /// the pipeline is one frame deep — so it only primes the latch.
    fn retire_one_input(&self) {
        let mut input = self.shared.input.lock();
        if !input.retire_primed {
            input.retire_primed = true;
            return;
        }
        let cursor = input.retire_cursor;
        let slot = input.ring.slot_mut(cursor);
        let ok = slot.transition(
            &[SlotStatus::Processing, SlotStatus::Loaded],
            SlotStatus::Ready,
        );
        debug_assert!(ok, "retire found slot in {:?}", input.ring.slot(cursor).status);
        if ok {
            input.retire_cursor = input.ring.wrap(cursor + 1);
            input.retired_total += 1;
            debug_assert!(input.retired_total <= input.submitted_total);
        }
    }
}
