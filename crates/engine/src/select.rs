//! Runtime engine backend selection.

use tracing::{info, warn};

use vpost_common::{EngineError, EnginePreference, PostEngine};

use crate::software::SoftwareEngine;
use crate::vaapi::VaapiEngine;

/// Construct the engine backend for `pref`.
///
/// `Auto` tries the VA-API hardware path first and falls back to the
/// software engine when the stack is unavailable; the forced variants
/// surface unavailability as an error instead.
pub fn create_engine(pref: EnginePreference) -> Result<Box<dyn PostEngine>, EngineError> {
    match pref {
        EnginePreference::Auto => match VaapiEngine::probe() {
            Ok(engine) => {
                info!("using VA-API engine");
                Ok(Box::new(engine))
            }
            Err(e) => {
                warn!(error = %e, "VA-API unavailable, falling back to software engine");
                Ok(Box::new(SoftwareEngine::new()))
            }
        },
        EnginePreference::ForceVaapi => VaapiEngine::probe().map(|e| {
            info!("using VA-API engine (forced)");
            Box::new(e) as Box<dyn PostEngine>
        }),
        EnginePreference::ForceSoftware => {
            info!("using software engine (forced)");
            Ok(Box::new(SoftwareEngine::new()))
        }
    }
}

/// Human-readable description of a preference, for logs and UIs.
pub fn describe_preference(pref: EnginePreference) -> &'static str {
    match pref {
        EnginePreference::Auto => "Auto (VA-API preferred, software fallback)",
        EnginePreference::ForceVaapi => "Force VA-API hardware path",
        EnginePreference::ForceSoftware => "Force software path",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_always_yields_an_engine() {
        // With or without a VA stack on the host, Auto must hand back a
        // usable engine.
        assert!(create_engine(EnginePreference::Auto).is_ok());
    }

    #[test]
    fn force_software_yields_software() {
        let engine = create_engine(EnginePreference::ForceSoftware).unwrap();
        // Unconfigured engines report the priming batch width.
        assert_eq!(engine.submit_batch_len(), 1);
    }

    #[test]
    fn preference_descriptions() {
        assert!(describe_preference(EnginePreference::Auto).contains("fallback"));
    }
}
