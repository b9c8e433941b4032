// THEORY:
// Two families of failure share one enum. Contract violations (bad maps, bad
// fractions, out-of-range coordinates, mismatched batches) are bugs in the
// caller or its configuration. `Upstream`, `Persistence` and `WorkerPool` wrap
// failures of the collaborators around the pipeline. Both abort the run.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for ablation operations
pub type Result<T> = std::result::Result<T, AblationError>;

/// Errors raised while ranking, perturbing or persisting images.
///
/// Everything except `Upstream`, `Persistence` and `WorkerPool` is a caller or
/// configuration bug and should abort the run.
#[derive(Error, Debug)]
pub enum AblationError {
    /// Importance map with zero rows or columns
    #[error("importance map is empty ({height}x{width})")]
    EmptyMap { height: usize, width: usize },

    /// Score buffer does not fill the declared grid
    #[error("importance map shape {height}x{width} does not match {len} scores")]
    MapShape {
        height: usize,
        width: usize,
        len: usize,
    },

    /// NaN or infinite score
    #[error("importance map holds a non-finite score at ({row}, {col})")]
    NonFiniteScore { row: usize, col: usize },

    /// Selection larger than the ranking it slices
    #[error("cannot select {count} pixels out of {total}")]
    CountExceedsPixels { count: usize, total: usize },

    /// Removal fraction outside (0, 1]
    #[error("removal fraction {0} is outside (0, 1]")]
    InvalidFraction(f64),

    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("unknown fill rule: {0}")]
    UnknownFillRule(String),

    /// Channel-mean fill needs an RGB image
    #[error("expected {expected} channels, image has {actual}")]
    ChannelCount { expected: usize, actual: usize },

    #[error("coordinate ({row}, {col}) is outside a {height}x{width} image")]
    CoordinateOutOfBounds {
        row: usize,
        col: usize,
        height: usize,
        width: usize,
    },

    /// Saliency output that does not line up with its batch
    #[error("batch {batch_index}: {reason}")]
    BatchMismatch { batch_index: usize, reason: String },

    /// Invalid run configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Saliency producer or dataset failed for a batch
    #[error("upstream failure in batch {batch_index}")]
    Upstream {
        batch_index: usize,
        #[source]
        source: anyhow::Error,
    },

    /// Output could not be written
    #[error("failed to persist {}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// A parallel worker went away before reporting its result
    #[error("worker pool failure: {0}")]
    WorkerPool(String),
}

impl AblationError {
    /// True for errors caused by malformed input or configuration rather
    /// than by a collaborator failing at runtime.
    pub fn is_contract_violation(&self) -> bool {
        !matches!(
            self,
            AblationError::Upstream { .. }
                | AblationError::Persistence { .. }
                | AblationError::WorkerPool(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_runtime_failures_apart_from_contract_violations() {
        let upstream = AblationError::Upstream {
            batch_index: 3,
            source: anyhow::anyhow!("model crashed"),
        };
        assert!(!upstream.is_contract_violation());
        assert_eq!(upstream.to_string(), "upstream failure in batch 3");

        let count = AblationError::CountExceedsPixels { count: 17, total: 16 };
        assert!(count.is_contract_violation());
        assert_eq!(count.to_string(), "cannot select 17 pixels out of 16");
    }
}
