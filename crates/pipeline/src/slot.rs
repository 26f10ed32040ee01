//! Buffer slots and the fixed-capacity slot ring.
//!
//! A slot tracks one buffer's position in the pipeline state machine; it
//! never owns the buffer storage itself. Input and output slots share the
//! record type but use disjoint parts of the status space:
//!
//! ```text
//! input:  Free -> Loaded -> Processing -> Ready -> Free
//! output: Free -> Processing -> Ready -> Rendering -> Free
//!                           \-> Ready -> Free
//! ```
//!
//! `EndFlag` is the drain sentinel an output slot carries instead of
//! `Processing` when the stream is flushing.

use vpost_common::{FrameFlags, FrameHandle, RetireFn, TimestampUs};

/// Pipeline state of one buffer slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotStatus {
    /// Not in use.
    Free,
    /// Input only: decoded frame loaded by the feeder.
    Loaded,
    /// Owned by the engine (hardware may hold references).
    Processing,
    /// Engine finished; ready for retirement (input) or delivery (output).
    Ready,
    /// Output only: handed to the consumer for scan-out.
    Rendering,
    /// Output only: drain sentinel, no frame behind it.
    EndFlag,
}

/// One buffer-tracking record.
pub(crate) struct BufferSlot {
    pub status: SlotStatus,
    /// Reference to externally-owned storage. Input slots hold one while
    /// occupied; output slots keep theirs for the pipeline's lifetime.
    pub payload: Option<FrameHandle>,
    pub timestamp_us: TimestampUs,
    pub flags: FrameFlags,
    /// Retirement callback (input slots only).
    pub on_retired: Option<RetireFn>,
}

impl BufferSlot {
    fn empty() -> Self {
        Self {
            status: SlotStatus::Free,
            payload: None,
            timestamp_us: TimestampUs::NONE,
            flags: FrameFlags::NONE,
            on_retired: None,
        }
    }

    /// Attempt a guarded transition. Returns false (and changes nothing)
    /// when the current status is not in `from` — callers treat that as
    /// "not ready yet", not as an error.
    pub fn transition(&mut self, from: &[SlotStatus], to: SlotStatus) -> bool {
        if from.contains(&self.status) {
            self.status = to;
            true
        } else {
            false
        }
    }

    /// Drop frame state, keeping the payload binding (output slots).
    pub fn clear_keep_payload(&mut self) {
        self.status = SlotStatus::Free;
        self.timestamp_us = TimestampUs::NONE;
        self.flags = FrameFlags::NONE;
    }

    /// Drop frame state and the payload reference (input slots), handing
    /// back the retirement callback if one was attached.
    pub fn clear_release_payload(&mut self) -> Option<(RetireFn, FrameHandle)> {
        let payload = self.payload.take();
        let on_retired = self.on_retired.take();
        self.status = SlotStatus::Free;
        self.timestamp_us = TimestampUs::NONE;
        self.flags = FrameFlags::NONE;
        match (on_retired, payload) {
            (Some(cb), Some(p)) => Some((cb, p)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for BufferSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferSlot")
            .field("status", &self.status)
            .field("payload", &self.payload)
            .field("timestamp_us", &self.timestamp_us)
            .finish()
    }
}

/// Fixed-capacity ring of buffer slots.
///
/// Capacity is fixed at construction and all index arithmetic funnels
/// through [`wrap`](Self::wrap), so wraparound lives in exactly one place.
pub(crate) struct SlotRing {
    slots: Box<[BufferSlot]>,
}

impl SlotRing {
    /// Ring of `capacity` free, unbound slots.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "slot ring capacity must be > 0");
        let slots = (0..capacity).map(|_| BufferSlot::empty()).collect();
        Self { slots }
    }

    /// Ring whose slots are permanently bound to the given payloads
    /// (output side).
    pub fn with_payloads(payloads: &[FrameHandle]) -> Self {
        let mut ring = Self::new(payloads.len());
        for (slot, payload) in ring.slots.iter_mut().zip(payloads) {
            slot.payload = Some(*payload);
        }
        ring
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Reduce any cursor value to a valid slot index.
    pub fn wrap(&self, index: usize) -> usize {
        index % self.slots.len()
    }

    /// Slot at `index` (wrapped).
    pub fn slot(&self, index: usize) -> &BufferSlot {
        &self.slots[self.wrap(index)]
    }

    /// Mutable slot at `index` (wrapped).
    pub fn slot_mut(&mut self, index: usize) -> &mut BufferSlot {
        let idx = self.wrap(index);
        &mut self.slots[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferSlot> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut BufferSlot> {
        self.slots.iter_mut()
    }

    /// Find the slot currently referencing `payload`.
    pub fn position_of(&self, payload: FrameHandle) -> Option<usize> {
        self.slots.iter().position(|s| s.payload == Some(payload))
    }

    pub fn count_status(&self, status: SlotStatus) -> usize {
        self.slots.iter().filter(|s| s.status == status).count()
    }
}

impl std::fmt::Debug for SlotRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Compact per-slot status summary, the moral equivalent of the
        // old printBuffers debug dump.
        let states: Vec<String> = self
            .slots
            .iter()
            .map(|s| format!("{:?}", s.status))
            .collect();
        write!(f, "SlotRing[{}]", states.join(", "))
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_guards_from_set() {
        let mut slot = BufferSlot::empty();
        assert!(slot.transition(&[SlotStatus::Free], SlotStatus::Loaded));
        assert_eq!(slot.status, SlotStatus::Loaded);

        // Ready -> Processing directly is illegal and must not stick.
        slot.status = SlotStatus::Ready;
        assert!(!slot.transition(&[SlotStatus::Free, SlotStatus::Loaded], SlotStatus::Processing));
        assert_eq!(slot.status, SlotStatus::Ready);
    }

    #[test]
    fn clear_release_hands_back_callback() {
        let mut slot = BufferSlot::empty();
        slot.status = SlotStatus::Ready;
        slot.payload = Some(FrameHandle(7));
        slot.on_retired = Some(Box::new(|_| {}));

        let released = slot.clear_release_payload();
        assert!(released.is_some());
        assert_eq!(released.unwrap().1, FrameHandle(7));
        assert_eq!(slot.status, SlotStatus::Free);
        assert!(slot.payload.is_none());

        // Second clear finds nothing to release.
        slot.status = SlotStatus::Ready;
        assert!(slot.clear_release_payload().is_none());
    }

    #[test]
    fn clear_keep_payload_retains_binding() {
        let mut slot = BufferSlot::empty();
        slot.payload = Some(FrameHandle(3));
        slot.status = SlotStatus::Ready;
        slot.timestamp_us = TimestampUs(100);

        slot.clear_keep_payload();
        assert_eq!(slot.status, SlotStatus::Free);
        assert_eq!(slot.payload, Some(FrameHandle(3)));
        assert_eq!(slot.timestamp_us, TimestampUs::NONE);
    }

    #[test]
    #[should_panic(expected = "capacity must be > 0")]
    fn zero_capacity_panics() {
        let _ = SlotRing::new(0);
    }

    #[test]
    fn wrap_is_modulo_capacity() {
        let ring = SlotRing::new(4);
        assert_eq!(ring.wrap(0), 0);
        assert_eq!(ring.wrap(4), 0);
        assert_eq!(ring.wrap(7), 3);
    }

    #[test]
    fn with_payloads_binds_in_order() {
        let handles = [FrameHandle(10), FrameHandle(11), FrameHandle(12)];
        let ring = SlotRing::with_payloads(&handles);
        assert_eq!(ring.capacity(), 3);
        assert_eq!(ring.slot(1).payload, Some(FrameHandle(11)));
        assert_eq!(ring.position_of(FrameHandle(12)), Some(2));
        assert_eq!(ring.position_of(FrameHandle(99)), None);
    }

    #[test]
    fn count_by_status() {
        let mut ring = SlotRing::new(3);
        ring.slot_mut(0).status = SlotStatus::Loaded;
        ring.slot_mut(1).status = SlotStatus::Loaded;
        assert_eq!(ring.count_status(SlotStatus::Loaded), 2);
        assert_eq!(ring.count_status(SlotStatus::Free), 1);
    }
}
