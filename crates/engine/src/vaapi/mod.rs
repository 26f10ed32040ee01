//! VA-API hardware engine backend.
//!
//! libva is loaded dynamically at runtime, so the crate has no link-time
//! dependency on it and the application can degrade gracefully when no
//! capable driver is installed.
//!
//! # Module Structure
//!
//! - [`library`] — dynamic loading of libva/libva-drm with typed symbols.
//! - [`engine`] — [`VaapiEngine`], the `PostEngine` implementation built
//!   on a DRM render node display.
//!
//! # Usage
//!
//! ```ignore
//! use vpost_engine::vaapi::{VaLibrary, VaapiEngine};
//! use std::sync::Arc;
//!
//! // Load libva once, share across engines.
//! let lib = Arc::new(VaLibrary::load()?);
//! let engine = VaapiEngine::new(lib)?;
//!
//! // The integrating layer registers its surface mapping before start.
//! engine.register_surface(frame_handle, va_surface_id);
//! ```

pub mod engine;
pub mod library;

pub use engine::VaapiEngine;
pub use library::{VaLibrary, VaLoadError};
