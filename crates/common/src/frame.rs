//! Frame payload references and per-frame flags.
//!
//! The pipeline never owns frame storage. A [`FrameHandle`] is an opaque
//! reference to a buffer owned by the decoder or the display allocator;
//! slots only track which handle they currently reference.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Opaque handle to externally-owned frame storage.
///
/// The integrating layer maps these to its real buffer objects (graphic
/// buffers, dma-bufs, driver surfaces). The pipeline treats them as
/// tokens: compared, copied, and handed to the engine, never dereferenced.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameHandle(pub u64);

impl FrameHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// Per-frame flag bits copied from the driving input frame.
///
/// Layout is a plain bitmask so flags can be forwarded to and from the
/// media framework without translation.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct FrameFlags(pub u32);

impl FrameFlags {
    pub const NONE: Self = Self(0);
    /// Stream ends with this frame.
    pub const END_OF_STREAM: Self = Self(1 << 0);
    /// Interlaced content; field order below applies.
    pub const INTERLACED: Self = Self(1 << 1);
    /// Top field first (only meaningful with `INTERLACED`).
    pub const TOP_FIELD_FIRST: Self = Self(1 << 2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for FrameFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for FrameFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for FrameFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for FrameFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = Vec::new();
        if self.contains(Self::END_OF_STREAM) {
            names.push("EOS");
        }
        if self.contains(Self::INTERLACED) {
            names.push("INTERLACED");
        }
        if self.contains(Self::TOP_FIELD_FIRST) {
            names.push("TFF");
        }
        if names.is_empty() {
            write!(f, "FrameFlags(NONE)")
        } else {
            write!(f, "FrameFlags({})", names.join("|"))
        }
    }
}

/// Retirement callback attached to an input frame.
///
/// Fired exactly once when the pipeline is fully done with the frame and
/// the feeder may reclaim its storage. The handle is passed back so the
/// feeder does not need its own bookkeeping.
pub type RetireFn = Box<dyn FnOnce(FrameHandle) + Send + 'static>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine_and_test() {
        let flags = FrameFlags::INTERLACED | FrameFlags::TOP_FIELD_FIRST;
        assert!(flags.contains(FrameFlags::INTERLACED));
        assert!(flags.contains(FrameFlags::TOP_FIELD_FIRST));
        assert!(!flags.contains(FrameFlags::END_OF_STREAM));
    }

    #[test]
    fn flags_default_empty() {
        assert!(FrameFlags::default().is_empty());
        assert!(!FrameFlags::END_OF_STREAM.is_empty());
    }

    #[test]
    fn flags_debug_names() {
        let flags = FrameFlags::END_OF_STREAM | FrameFlags::INTERLACED;
        let dbg = format!("{flags:?}");
        assert!(dbg.contains("EOS"));
        assert!(dbg.contains("INTERLACED"));
    }

    #[test]
    fn handle_roundtrip() {
        let h = FrameHandle::new(42);
        assert_eq!(h.raw(), 42);
        assert_eq!(h.to_string(), "frame#42");
    }
}
