//! `vpost-engine` — Engine backends for the vpost pipeline.
//!
//! Two implementations of [`vpost_common::PostEngine`] live here, selected
//! at construction time:
//!
//! - [`vaapi`] — the VA-API hardware path. libva is loaded dynamically at
//!   runtime so the crate links nowhere and degrades gracefully on
//!   machines without a capable driver.
//! - [`software`] — a deterministic software engine that honors the full
//!   scheduling contract (FIFO batching, reference warm-up, blocking
//!   harvest). It is the fallback when no hardware is present and the
//!   engine the test suites drive.
//!
//! Use [`select::create_engine`] unless a specific backend is required.

pub mod select;
pub mod software;
pub mod vaapi;

pub use select::create_engine;
pub use software::SoftwareEngine;
pub use vaapi::{VaLibrary, VaLoadError, VaapiEngine};
