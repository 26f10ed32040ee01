//! Engine backend abstraction.
//!
//! The pipeline drives the hardware post-processor exclusively through
//! [`PostEngine`]. Backends (VA-API hardware, software fallback) implement
//! this trait and are selected at construction time; the scheduling core
//! never branches on which one it got.

use crate::config::{EngineCaps, VideoInfo};
use crate::error::EngineError;
use crate::frame::{FrameFlags, FrameHandle};

/// One hardware (or simulated) video post-processing engine.
///
/// # Contract
///
/// The submit loop and the harvest loop call into the engine from two
/// different threads. Implementations must serialize internally where the
/// underlying device cannot take concurrent calls; the trait therefore
/// takes `&self` everywhere and requires `Send + Sync`.
///
/// Batches flow strictly FIFO: the `outputs` passed to [`harvest`]
/// must be exactly the outputs of the oldest unharvested [`submit`].
/// Queue depth is bounded by the negotiated forward-reference depth.
///
/// [`harvest`]: PostEngine::harvest
/// [`submit`]: PostEngine::submit
pub trait PostEngine: Send + Sync {
    /// Negotiate capabilities for a stream. Idempotent; must be called
    /// before the first submit. Re-configuring an engine mid-stream is
    /// only legal through [`reset`](PostEngine::reset).
    fn configure(&self, info: &VideoInfo) -> Result<EngineCaps, EngineError>;

    /// Queue one input frame (or the end-of-stream drain marker) for
    /// processing into `outputs`. Non-blocking or short-blocking.
    ///
    /// `input` is `None` only when `end_of_stream` is set, in which case
    /// `outputs` carries the single drain surface. Otherwise `outputs`
    /// must hold exactly [`submit_batch_len`](PostEngine::submit_batch_len)
    /// handles.
    fn submit(
        &self,
        input: Option<FrameHandle>,
        outputs: &[FrameHandle],
        end_of_stream: bool,
        flags: FrameFlags,
    ) -> Result<(), EngineError>;

    /// Wait for the oldest submitted batch to finish and release its
    /// output surfaces to the caller.
    ///
    /// Blocks until the device signals completion; the wait is bounded by
    /// hardware latency, not by a pipeline timeout.
    fn harvest(&self, outputs: &[FrameHandle]) -> Result<(), EngineError>;

    /// Output slots the *next* submit will consume, evaluated at the
    /// engine's submission index.
    fn submit_batch_len(&self) -> u32;

    /// Output slots ready to harvest, evaluated at the engine's harvest
    /// index. Returns 0 while the forward-reference window is still
    /// filling.
    fn harvest_batch_len(&self) -> u32;

    /// Drop all pending device state and re-arm filter configuration.
    ///
    /// Only legal while both pipeline loops are paused after a completed
    /// drain; the caller guarantees no batch is in flight.
    fn reset(&self) -> Result<(), EngineError>;
}
