//! Stream negotiation and pipeline sizing.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::FrcRate;

/// Hard cap on either slot array. Allocation is fixed at startup; a
/// negotiation that needs more than this is rejected, never truncated.
pub const MAX_SLOTS: usize = 32;

/// Geometry/rate description of the stream about to be processed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Input frame rate in frames per second (integer; the FRC table only
    /// matches exact broadcast rates).
    pub fps: u32,
}

impl VideoInfo {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }

    /// Validate the geometry against what the post-processor supports.
    ///
    /// Below QCIF there is nothing worth enhancing and above 1080p the
    /// hardware path is not rated; both are configuration errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.fps == 0 {
            return Err(ConfigError::UnsupportedGeometry {
                width: self.width,
                height: self.height,
            });
        }
        if self.height < 144 || self.height > 1080 {
            return Err(ConfigError::UnsupportedGeometry {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }

    pub fn area(&self) -> u32 {
        self.width * self.height
    }
}

/// Post-processing filters the engine enables for a stream.
///
/// Selection is by resolution area tier: small frames get the full
/// cleanup chain, HD content only sharpening. Reported as capability
/// metadata; the filter math itself lives behind the engine.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSelection {
    pub deblock: bool,
    pub denoise: bool,
    pub sharpen: bool,
    pub color_balance: bool,
    pub frame_rate_conversion: bool,
}

impl FilterSelection {
    const QVGA_AREA: u32 = 320 * 240;
    const VGA_AREA: u32 = 640 * 480;
    const HD1080_AREA: u32 = 1920 * 1080;

    /// Choose filters for a stream the way the hardware path tiers them.
    pub fn for_stream(info: &VideoInfo, frc: FrcRate) -> Self {
        let area = info.area();
        let mut sel = Self {
            frame_rate_conversion: frc.is_converting(),
            ..Self::default()
        };
        if area <= Self::QVGA_AREA {
            sel.deblock = true;
            sel.sharpen = true;
            sel.color_balance = true;
        } else if area <= Self::VGA_AREA {
            sel.denoise = true;
            sel.sharpen = true;
            sel.color_balance = true;
        } else if area <= Self::HD1080_AREA {
            sel.sharpen = true;
        }
        sel
    }
}

/// Capabilities negotiated with the engine for one stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCaps {
    /// Frames of prior context the hardware needs buffered before it can
    /// emit output.
    pub forward_reference_depth: u32,
    /// Negotiated frame-rate conversion ratio.
    pub frc_rate: FrcRate,
    /// Filters the engine enabled for this stream.
    pub filters: FilterSelection,
}

/// Which engine backend to construct.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnginePreference {
    /// Auto-detect: VA-API hardware if available, software otherwise.
    #[default]
    Auto,
    /// Require the VA-API hardware path.
    ForceVaapi,
    /// Require the software path.
    ForceSoftware,
}

/// Derived sizing for one pipeline instance.
///
/// Slot counts follow the hardware's buffering model: the input side
/// needs the reference window plus working slack, the output side one
/// full burst per in-flight input.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    pub info: VideoInfo,
    pub caps: EngineCaps,
    pub input_slots: usize,
    pub output_slots: usize,
    /// Output frame rate after conversion, used for timestamp spacing of
    /// generated frames.
    pub output_fps: u32,
}

impl PipelineConfig {
    /// Compute slot counts from negotiated capabilities.
    ///
    /// Fails deterministically when either array would exceed
    /// [`MAX_SLOTS`]; the pipeline must never silently truncate capacity
    /// the engine was promised.
    pub fn derive(info: VideoInfo, caps: EngineCaps) -> Result<Self, ConfigError> {
        info.validate()?;

        let depth = caps.forward_reference_depth as usize;
        let burst = caps.frc_rate.burst_len() as usize;
        let input_slots = depth + 3;
        let output_slots = (depth + 2) * burst;

        if input_slots > MAX_SLOTS {
            return Err(ConfigError::CapacityExceeded {
                array: "input",
                required: input_slots,
                max: MAX_SLOTS,
            });
        }
        if output_slots > MAX_SLOTS {
            return Err(ConfigError::CapacityExceeded {
                array: "output",
                required: output_slots,
                max: MAX_SLOTS,
            });
        }

        Ok(Self {
            info,
            caps,
            input_slots,
            output_slots,
            output_fps: caps.frc_rate.output_fps(info.fps),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(depth: u32, rate: FrcRate) -> EngineCaps {
        EngineCaps {
            forward_reference_depth: depth,
            frc_rate: rate,
            filters: FilterSelection::default(),
        }
    }

    #[test]
    fn derive_basic_sizing() {
        let cfg =
            PipelineConfig::derive(VideoInfo::new(1280, 720, 30), caps(3, FrcRate::X2)).unwrap();
        assert_eq!(cfg.input_slots, 6);
        assert_eq!(cfg.output_slots, 10);
        assert_eq!(cfg.output_fps, 60);
    }

    #[test]
    fn derive_1x_minimal() {
        let cfg =
            PipelineConfig::derive(VideoInfo::new(640, 480, 25), caps(0, FrcRate::X1)).unwrap();
        assert_eq!(cfg.input_slots, 3);
        assert_eq!(cfg.output_slots, 2);
        assert_eq!(cfg.output_fps, 25);
    }

    #[test]
    fn derive_2_5x_reserves_widest_burst() {
        let cfg =
            PipelineConfig::derive(VideoInfo::new(1280, 720, 24), caps(1, FrcRate::X2_5)).unwrap();
        // (1 + 2) * 3 — the odd 3-wide bursts size the array.
        assert_eq!(cfg.output_slots, 9);
        assert_eq!(cfg.output_fps, 60);
    }

    #[test]
    fn derive_rejects_output_overflow() {
        // (7 + 2) * 4 = 36 > 32
        let err = PipelineConfig::derive(VideoInfo::new(1280, 720, 15), caps(7, FrcRate::X4))
            .unwrap_err();
        match err {
            ConfigError::CapacityExceeded {
                array,
                required,
                max,
            } => {
                assert_eq!(array, "output");
                assert_eq!(required, 36);
                assert_eq!(max, MAX_SLOTS);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn derive_rejects_input_overflow() {
        let err = PipelineConfig::derive(VideoInfo::new(1280, 720, 60), caps(30, FrcRate::X1))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::CapacityExceeded { array: "input", .. }
        ));
    }

    #[test]
    fn geometry_gate() {
        assert!(VideoInfo::new(176, 120, 30).validate().is_err());
        assert!(VideoInfo::new(3840, 2160, 30).validate().is_err());
        assert!(VideoInfo::new(176, 144, 30).validate().is_ok());
        assert!(VideoInfo::new(1920, 1080, 30).validate().is_ok());
    }

    #[test]
    fn filter_tiers() {
        let qcif = FilterSelection::for_stream(&VideoInfo::new(176, 144, 30), FrcRate::X2);
        assert!(qcif.deblock && qcif.sharpen && qcif.color_balance);
        assert!(!qcif.denoise);
        assert!(qcif.frame_rate_conversion);

        let vga = FilterSelection::for_stream(&VideoInfo::new(640, 480, 25), FrcRate::X1);
        assert!(vga.denoise && vga.sharpen && vga.color_balance);
        assert!(!vga.deblock);
        assert!(!vga.frame_rate_conversion);

        let hd = FilterSelection::for_stream(&VideoInfo::new(1920, 1080, 30), FrcRate::X2);
        assert!(hd.sharpen);
        assert!(!hd.deblock && !hd.denoise && !hd.color_balance);
    }
}
