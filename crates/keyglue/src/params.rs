use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};

use crate::error::MatchError;
use crate::matcher::Matcher;

/// Bundle format revision this build understands.
pub const BUNDLE_VERSION: &str = "1";

fn default_version() -> String {
    BUNDLE_VERSION.to_string()
}

fn default_descriptor_dim() -> usize {
    256
}

fn default_keypoint_encoder() -> Vec<usize> {
    vec![32, 64, 128, 256]
}

fn default_gnn_layers() -> usize {
    9
}

fn default_num_heads() -> usize {
    4
}

/// Hyperparameters a weight bundle was trained with.
///
/// Stored as a JSON sidecar next to the safetensors weights so a bundle is
/// self-describing; the weights themselves are opaque tensors addressed by
/// the module tree (`kenc.*`, `gnn.layers.*`, `final_proj`, `bin_score`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherParams {
    /// Bundle format version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Descriptor dimensionality `D`.
    #[serde(default = "default_descriptor_dim")]
    pub descriptor_dim: usize,
    /// Hidden channels of the keypoint encoder MLP.
    #[serde(default = "default_keypoint_encoder")]
    pub keypoint_encoder: Vec<usize>,
    /// Number of self/cross attention layer pairs.
    #[serde(default = "default_gnn_layers")]
    pub gnn_layers: usize,
    /// Attention heads per layer.
    #[serde(default = "default_num_heads")]
    pub num_heads: usize,
}

impl Default for MatcherParams {
    fn default() -> Self {
        Self {
            version: default_version(),
            descriptor_dim: default_descriptor_dim(),
            keypoint_encoder: default_keypoint_encoder(),
            gnn_layers: default_gnn_layers(),
            num_heads: default_num_heads(),
        }
    }
}

impl MatcherParams {
    /// Read the JSON sidecar of a weight bundle.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, MatchError> {
        let data = std::fs::read_to_string(path)?;
        let params: Self = serde_json::from_str(&data)?;
        params.validate()?;
        Ok(params)
    }

    /// Reject hyperparameter combinations no trained bundle can have.
    pub fn validate(&self) -> Result<(), MatchError> {
        if self.version != BUNDLE_VERSION {
            return Err(MatchError::InvalidConfig(format!(
                "unsupported bundle version {:?}, expected {BUNDLE_VERSION:?}",
                self.version
            )));
        }
        if self.descriptor_dim == 0 {
            return Err(MatchError::InvalidConfig(
                "descriptor_dim must be positive".to_string(),
            ));
        }
        if self.num_heads == 0 || self.descriptor_dim % self.num_heads != 0 {
            return Err(MatchError::InvalidConfig(format!(
                "descriptor_dim {} is not divisible into {} heads",
                self.descriptor_dim, self.num_heads
            )));
        }
        if self.gnn_layers == 0 {
            return Err(MatchError::InvalidConfig(
                "gnn_layers must be at least 1".to_string(),
            ));
        }
        if self.keypoint_encoder.iter().any(|&c| c == 0) {
            return Err(MatchError::InvalidConfig(
                "keypoint_encoder channels must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Matcher {
    /// Load a trained bundle from disk.
    ///
    /// `params_path` is the JSON hyperparameter sidecar, `weights_path` a
    /// safetensors file holding the tensors; the file is memory-mapped and
    /// read once. The returned matcher never mutates the weights.
    pub fn from_safetensors(
        params_path: impl AsRef<Path>,
        weights_path: impl AsRef<Path>,
        device: &Device,
    ) -> Result<Self, MatchError> {
        let params = MatcherParams::from_json_file(params_path)?;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path.as_ref()], DType::F32, device)?
        };
        Self::new(params, vb)
    }
}
