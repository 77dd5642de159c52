use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

use crate::norm::ChannelNorm;

const NORM_EPS: f64 = 1e-5;

struct MlpLayer {
    linear: Linear,
    norm: Option<ChannelNorm>,
}

/// Point-wise multi-layer perceptron over a `(N, C)` sequence.
///
/// Every hidden layer is linear -> [`ChannelNorm`] -> ReLU; the final layer
/// is a bare linear. Each row (point) is transformed independently, so the
/// output for a point never depends on the other points in the sequence.
pub struct PointMlp {
    layers: Vec<MlpLayer>,
}

impl PointMlp {
    /// Build an MLP from the channel sizes `[in, hidden.., out]`.
    ///
    /// Weights are read from `layers.{i}.linear` and `layers.{i}.norm`
    /// under `vb`. `channels` must contain at least two entries.
    pub fn new(channels: &[usize], vb: VarBuilder) -> Result<Self> {
        if channels.len() < 2 {
            candle_core::bail!(
                "an mlp needs at least input and output channels, got {:?}",
                channels
            );
        }
        let mut layers = Vec::with_capacity(channels.len() - 1);
        for i in 0..channels.len() - 1 {
            let vb_layer = vb.pp(format!("layers.{i}"));
            let linear = candle_nn::linear(channels[i], channels[i + 1], vb_layer.pp("linear"))?;
            let norm = if i + 2 < channels.len() {
                Some(ChannelNorm::new(channels[i + 1], NORM_EPS, vb_layer.pp("norm"))?)
            } else {
                None
            };
            layers.push(MlpLayer { linear, norm });
        }
        Ok(Self { layers })
    }
}

impl Module for PointMlp {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.clone();
        for layer in &self.layers {
            xs = layer.linear.forward(&xs)?;
            if let Some(norm) = &layer.norm {
                xs = norm.forward(&xs)?.relu()?;
            }
        }
        Ok(xs)
    }
}
