//! Core value types with newtype pattern for type safety.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Presentation timestamp in microseconds.
///
/// `-1` is the sentinel for "no timestamp" (matches the convention of the
/// media frameworks that feed the pipeline).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimestampUs(pub i64);

impl TimestampUs {
    pub const NONE: Self = Self(-1);
    pub const ZERO: Self = Self(0);

    pub fn from_micros(us: i64) -> Self {
        Self(us)
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }

    /// Whether this carries a real timestamp (not the `-1` sentinel).
    pub fn is_set(self) -> bool {
        self.0 >= 0
    }

    /// Shift backwards by `us` microseconds.
    pub fn backdated_by(self, us: i64) -> Self {
        Self(self.0 - us)
    }
}

impl fmt::Display for TimestampUs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_set() {
            write!(f, "{}us", self.0)
        } else {
            write!(f, "unset")
        }
    }
}

/// Frame-rate conversion ratio negotiated from the input frame rate.
///
/// The ratio determines how many output frames the engine generates per
/// input frame once the reference window is warm. 2.5× alternates between
/// 3-frame and 2-frame bursts so the long-run average is 2.5.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrcRate {
    #[default]
    X1,
    X2,
    X2_5,
    X4,
}

impl FrcRate {
    /// Negotiate the rate from the input frame rate.
    ///
    /// Only the film/broadcast rates the hardware interpolator accepts get
    /// conversion; everything else passes through at 1×.
    pub fn from_input_fps(fps: u32) -> Self {
        match fps {
            15 => Self::X4,
            24 => Self::X2_5,
            30 => Self::X2,
            _ => Self::X1,
        }
    }

    /// Whether frame-rate conversion is active at all.
    pub fn is_converting(self) -> bool {
        self != Self::X1
    }

    /// Worst-case output frames per input frame.
    ///
    /// 2.5× reserves 3: the odd bursts are 3 frames wide and buffer
    /// capacity must cover the widest burst.
    pub fn burst_len(self) -> u32 {
        match self {
            Self::X1 => 1,
            Self::X2 => 2,
            Self::X2_5 => 3,
            Self::X4 => 4,
        }
    }

    /// Output frames generated for the batch at `index`.
    ///
    /// Index 0 is the priming frame and always yields a single output.
    /// Beyond that, 2× and 4× yield fixed-size bursts while 2.5×
    /// alternates 3/2 by the low bit of the index. This odd/even rule is
    /// reproduced from the hardware scheduling behavior as-is.
    pub fn batch_len_at(self, index: u64) -> u32 {
        if index == 0 || !self.is_converting() {
            return 1;
        }
        match self {
            Self::X2_5 => self.burst_len() - (index & 1) as u32,
            _ => self.burst_len(),
        }
    }

    /// Output frame rate for a given input frame rate.
    ///
    /// 2.5× uses integer `fps * 5 / 2`, matching the parameter the
    /// conversion filter is programmed with.
    pub fn output_fps(self, input_fps: u32) -> u32 {
        match self {
            Self::X1 => input_fps,
            Self::X2 => input_fps * 2,
            Self::X2_5 => input_fps * 5 / 2,
            Self::X4 => input_fps * 4,
        }
    }
}

impl fmt::Display for FrcRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X1 => write!(f, "1x"),
            Self::X2 => write!(f, "2x"),
            Self::X2_5 => write!(f, "2.5x"),
            Self::X4 => write!(f, "4x"),
        }
    }
}

/// Video frame resolution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const QVGA: Self = Self {
        width: 320,
        height: 240,
    };
    pub const VGA: Self = Self {
        width: 640,
        height: 480,
    };
    pub const HD: Self = Self {
        width: 1920,
        height: 1080,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_sentinel() {
        assert!(!TimestampUs::NONE.is_set());
        assert!(TimestampUs::ZERO.is_set());
        assert!(TimestampUs(33_333).is_set());
    }

    #[test]
    fn timestamp_backdate() {
        let ts = TimestampUs(33_333).backdated_by(16_667);
        assert_eq!(ts, TimestampUs(16_666));
    }

    #[test]
    fn frc_rate_from_fps_table() {
        assert_eq!(FrcRate::from_input_fps(15), FrcRate::X4);
        assert_eq!(FrcRate::from_input_fps(24), FrcRate::X2_5);
        assert_eq!(FrcRate::from_input_fps(30), FrcRate::X2);
        assert_eq!(FrcRate::from_input_fps(25), FrcRate::X1);
        assert_eq!(FrcRate::from_input_fps(60), FrcRate::X1);
    }

    #[test]
    fn batch_len_priming_frame_is_one() {
        for rate in [FrcRate::X1, FrcRate::X2, FrcRate::X2_5, FrcRate::X4] {
            assert_eq!(rate.batch_len_at(0), 1, "{rate} index 0");
        }
    }

    #[test]
    fn batch_len_steady_state() {
        assert_eq!(FrcRate::X1.batch_len_at(5), 1);
        assert_eq!(FrcRate::X2.batch_len_at(5), 2);
        assert_eq!(FrcRate::X4.batch_len_at(5), 4);
    }

    #[test]
    fn batch_len_2_5x_alternates() {
        // Odd indices drop one frame so the average converges on 2.5.
        assert_eq!(FrcRate::X2_5.batch_len_at(1), 2);
        assert_eq!(FrcRate::X2_5.batch_len_at(2), 3);
        assert_eq!(FrcRate::X2_5.batch_len_at(3), 2);
        assert_eq!(FrcRate::X2_5.batch_len_at(4), 3);
    }

    #[test]
    fn output_fps_integer_math() {
        assert_eq!(FrcRate::X4.output_fps(15), 60);
        assert_eq!(FrcRate::X2_5.output_fps(24), 60);
        assert_eq!(FrcRate::X2.output_fps(30), 60);
        assert_eq!(FrcRate::X1.output_fps(25), 25);
    }

    #[test]
    fn rate_display() {
        assert_eq!(FrcRate::X2_5.to_string(), "2.5x");
    }
}
