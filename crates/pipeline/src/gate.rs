//! Worker-loop parking primitive.
//!
//! The two loops park when they cannot make progress and are woken by the
//! feeder, the consumer, the sibling loop, or the coordinator. A bare
//! condition variable invites lost wakeups when the waker fires between
//! the "no work" decision and the wait; `WakeGate` closes that window
//! with a generation counter: observe the generation, try to make
//! progress, and wait only while the generation is unchanged. Every
//! notification bumps the generation under the gate lock, so a wake that
//! raced the work attempt turns the wait into a no-op.

use parking_lot::{Condvar, Mutex};

/// What a loop iteration decided.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum StepOutcome {
    /// Work was done; run another iteration immediately.
    Progress,
    /// Nothing to do; park until the gate is notified.
    Park,
    /// Fatal condition; leave the run loop.
    Stop,
}

struct GateState {
    generation: u64,
    exit: bool,
}

/// Lost-wakeup-free park/wake gate for one worker loop.
pub(crate) struct WakeGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl WakeGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                generation: 0,
                exit: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Snapshot the generation before attempting work.
    pub fn observe(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn exit_requested(&self) -> bool {
        self.state.lock().exit
    }

    /// Park until the generation moves past `seen` or exit is requested.
    pub fn wait_while_unchanged(&self, seen: u64) {
        let mut state = self.state.lock();
        while state.generation == seen && !state.exit {
            self.cond.wait(&mut state);
        }
    }

    /// Wake the loop. Safe to call from any thread at any time.
    pub fn notify(&self) {
        let mut state = self.state.lock();
        state.generation = state.generation.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Ask the loop to leave its run method and wake it if parked.
    pub fn request_exit(&self) {
        let mut state = self.state.lock();
        state.exit = true;
        state.generation = state.generation.wrapping_add(1);
        self.cond.notify_all();
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn notify_before_wait_is_not_lost() {
        let gate = WakeGate::new();
        let seen = gate.observe();
        // Wake arrives while the "loop" is still deciding.
        gate.notify();
        // The wait must return immediately instead of parking forever.
        gate.wait_while_unchanged(seen);
    }

    #[test]
    fn exit_unparks_waiter() {
        let gate = Arc::new(WakeGate::new());
        let seen = gate.observe();

        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait_while_unchanged(seen))
        };

        thread::sleep(Duration::from_millis(10));
        gate.request_exit();
        waiter.join().unwrap();
        assert!(gate.exit_requested());
    }

    #[test]
    fn notify_unparks_waiter() {
        let gate = Arc::new(WakeGate::new());
        let seen = gate.observe();

        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait_while_unchanged(seen))
        };

        thread::sleep(Duration::from_millis(10));
        gate.notify();
        waiter.join().unwrap();
    }
}
