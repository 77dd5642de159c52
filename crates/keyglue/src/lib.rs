#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! keyglue matches two sets of visual keypoints with the SuperGlue
//! architecture (Sarlin et al., CVPR 2020): descriptors are augmented with a
//! positional encoding, refined jointly by an attentional graph neural
//! network, scored pairwise and turned into a partial assignment with a
//! log-domain optimal transport solver, from which mutually consistent
//! matches are extracted.
//!
//! The pipeline is inference only. Trained weights are loaded once into a
//! [`Matcher`], which is immutable afterwards and safe to share across
//! threads; every [`Matcher::match_pair`] call is a pure function of its
//! inputs.

/// Keypoint positional encoder.
pub mod encoder;

/// Error types for the matching pipeline.
pub mod error;

/// Attentional graph network refining descriptors across both images.
pub mod gnn;

/// Keypoint containers and coordinate normalization.
pub mod keypoints;

/// The matching pipeline front door.
pub mod matcher;

/// Trained parameter bundle handling.
pub mod params;

/// Log-domain optimal transport solver.
pub mod transport;

pub use error::MatchError;
pub use keypoints::{normalize_keypoints, ImageFeatures, ImageShape};
pub use matcher::{MatchConfig, MatchResult, Matcher};
pub use params::MatcherParams;
