//! `vpost-common` — Shared types, traits, and errors for the vpost engine.
//!
//! This crate is the foundation the other workspace crates depend on.
//! It defines the core abstractions:
//!
//! - **Types**: `TimestampUs`, `FrcRate`, `Resolution` (newtypes for safety)
//! - **Frames**: `FrameHandle`, `FrameFlags`, `RetireFn` (payload references)
//! - **Config**: `VideoInfo`, `EngineCaps`, `PipelineConfig`, `EnginePreference`
//! - **Engine**: `PostEngine` (hardware backend abstraction)
//! - **Errors**: `ConfigError`, `EngineError`, `PipelineError` (thiserror-based)

pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod types;

// Re-export commonly used items at crate root
pub use config::{EngineCaps, EnginePreference, FilterSelection, PipelineConfig, VideoInfo};
pub use engine::PostEngine;
pub use error::{ConfigError, EngineError, PipelineError, PipelineResult};
pub use frame::{FrameFlags, FrameHandle, RetireFn};
pub use types::{FrcRate, Resolution, TimestampUs};
