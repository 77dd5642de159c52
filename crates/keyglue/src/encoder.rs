use candle_core::{DType, Result, Tensor};
use candle_nn::{Module, VarBuilder};
use keyglue_nn::PointMlp;

/// Positional encoder mapping keypoint geometry into descriptor space.
///
/// Each keypoint's normalized `(x, y)` coordinate and detection confidence
/// are pushed through a point-wise MLP to a `D`-dimensional vector that the
/// matcher adds to the visual descriptor. Keypoints are encoded
/// independently; there is no cross-keypoint interaction here.
pub struct KeypointEncoder {
    mlp: PointMlp,
    descriptor_dim: usize,
}

impl KeypointEncoder {
    /// Build the encoder MLP with channels `[3, hidden.., descriptor_dim]`.
    pub fn new(descriptor_dim: usize, hidden_channels: &[usize], vb: VarBuilder) -> Result<Self> {
        let mut channels = Vec::with_capacity(hidden_channels.len() + 2);
        channels.push(3);
        channels.extend_from_slice(hidden_channels);
        channels.push(descriptor_dim);
        Ok(Self {
            mlp: PointMlp::new(&channels, vb)?,
            descriptor_dim,
        })
    }

    /// Encode normalized keypoints `(N, 2)` and scores `(N,)` to `(N, D)`.
    pub fn forward(&self, keypoints: &Tensor, scores: &Tensor) -> Result<Tensor> {
        let (n, _) = keypoints.dims2()?;
        if n == 0 {
            return Tensor::zeros((0, self.descriptor_dim), DType::F32, keypoints.device());
        }
        let input = Tensor::cat(&[keypoints, &scores.unsqueeze(1)?], 1)?;
        self.mlp.forward(&input)
    }
}
