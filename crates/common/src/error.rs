//! Central error types for the pipeline (thiserror-based).

use thiserror::Error;

/// Stream/pipeline configuration errors. Detected synchronously before
/// the pipeline starts; never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported geometry {width}x{height}")]
    UnsupportedGeometry { width: u32, height: u32 },

    #[error("{array} slot array needs {required} slots, limit is {max}")]
    CapacityExceeded {
        array: &'static str,
        required: usize,
        max: usize,
    },

    #[error("output payload count {got} does not match negotiated capacity {expected}")]
    PayloadCountMismatch { expected: usize, got: usize },
}

/// Engine backend errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine backend not available: {0}")]
    Unavailable(String),

    #[error("unsupported stream: {0}")]
    Unsupported(String),

    #[error("engine not configured before use")]
    NotConfigured,

    #[error("submit rejected: {0}")]
    Submit(String),

    #[error("harvest failed: {0}")]
    Harvest(String),

    #[error("unknown frame handle {0}")]
    UnknownFrame(u64),
}

/// Errors surfaced by the pipeline's feeder/consumer interface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// A submit or harvest failed and the pipeline is stopped. Remaining
    /// READY output is still deliverable; everything else requires
    /// re-creation.
    #[error("pipeline faulted; recreate the pipeline to recover")]
    Faulted,

    #[error("pipeline is shut down")]
    ShutDown,
}

/// Convenience Result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::CapacityExceeded {
            array: "output",
            required: 36,
            max: 32,
        };
        assert_eq!(err.to_string(), "output slot array needs 36 slots, limit is 32");
    }

    #[test]
    fn engine_error_chains_into_pipeline_error() {
        let err: PipelineError = EngineError::NotConfigured.into();
        assert!(matches!(err, PipelineError::Engine(EngineError::NotConfigured)));
    }
}
