/// An error type for the matching pipeline.
#[derive(thiserror::Error, Debug)]
pub enum MatchError {
    /// Image dimensions must be strictly positive to normalize keypoints.
    #[error("invalid image shape {height}x{width}")]
    InvalidImageShape {
        /// Reported image height.
        height: usize,
        /// Reported image width.
        width: usize,
    },

    /// Per-keypoint arrays disagree in length.
    #[error("{kind} length ({found}) does not match the keypoint count ({expected})")]
    LengthMismatch {
        /// Which array disagrees.
        kind: &'static str,
        /// Expected number of entries.
        expected: usize,
        /// Number of entries found.
        found: usize,
    },

    /// Descriptors do not have the dimensionality the weights were trained with.
    #[error("descriptor dimension ({found}) does not match the trained dimension ({expected})")]
    DescriptorDimMismatch {
        /// Dimension the parameter bundle was trained with.
        expected: usize,
        /// Dimension inferred from the input.
        found: usize,
    },

    /// Rejected configuration or hyperparameter value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// NaN or infinity leaked out of the transport solver.
    #[error("non-finite value in the soft assignment")]
    NonFiniteAssignment,

    /// Tensor backend error.
    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    /// Weight bundle I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Hyperparameter sidecar parsing error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
