//! `vpost-pipeline` — the dual-thread buffer-slot scheduling core.
//!
//! Decoded frames go in, post-processed frames come out, and everything
//! between is a bounded-buffer hand-off across two long-lived worker
//! threads:
//!
//! - the **submit loop** pulls the oldest loaded input slot plus the
//!   output slots its batch needs (1–4 of them, set by the negotiated
//!   frame-rate-conversion ratio) and pushes them into the engine;
//! - the **harvest loop** waits on the engine, publishes finished output
//!   slots, backdates the timestamps of generated frames, and retires the
//!   input that produced them;
//! - the **flush/seek coordinator** drains in-flight hardware work before
//!   any slot state is reset, because the device may hold buffer
//!   references mid-transform.
//!
//! The feeder and consumer call in from arbitrary threads; every entry
//! point is a short critical section on one of the two slot-array locks.
//!
//! ```ignore
//! use std::sync::Arc;
//! use vpost_common::{PipelineConfig, PostEngine, VideoInfo};
//! use vpost_pipeline::PostPipeline;
//!
//! let engine: Arc<dyn PostEngine> = vpost_engine::create_engine(Default::default())?.into();
//! let info = VideoInfo::new(1280, 720, 30);
//! let caps = engine.configure(&info)?;
//! let config = PipelineConfig::derive(info, caps)?;
//!
//! let pipeline = PostPipeline::start(engine, config, display_buffers)?;
//! // feeder: pipeline.load_input(...), pipeline.notify_end_of_stream()
//! // consumer: pipeline.poll_ready_output(), pipeline.recycle_output(...)
//! ```

mod coordinator;
mod gate;
mod harvest;
mod pipeline;
mod slot;
mod submit;
mod table;

pub use coordinator::FlushOutcome;
pub use pipeline::{OutputFrame, PipelineStats, PostPipeline};
pub use table::LoadOutcome;
