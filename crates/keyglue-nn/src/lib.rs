#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Multi-head scaled dot-product attention over keypoint sets.
pub mod attention;

/// Point-wise multi-layer perceptron.
pub mod mlp;

/// Per-channel normalization with folded statistics.
pub mod norm;

pub use attention::MultiHeadAttention;
pub use mlp::PointMlp;
pub use norm::ChannelNorm;
