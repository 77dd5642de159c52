use candle_core::{Result, Tensor};
use candle_nn::{Init, Module, VarBuilder};

/// Per-channel normalization in inference form.
///
/// Normalizes each channel of a `(N, C)` sequence with statistics that were
/// accumulated during training (`running_mean`, `running_var`) and applies
/// the learned affine parameters. The four tensors are folded into a single
/// scale and shift at construction time, so the forward pass is one
/// multiply-add per element:
///
/// `y = x * weight / sqrt(var + eps) + (bias - mean * weight / sqrt(var + eps))`
#[derive(Debug, Clone)]
pub struct ChannelNorm {
    scale: Tensor,
    shift: Tensor,
}

impl ChannelNorm {
    /// Load a norm layer for `dim` channels from `weight`, `bias`,
    /// `running_mean` and `running_var` under `vb`.
    pub fn new(dim: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(dim, "weight", Init::Const(1.0))?;
        let bias = vb.get_with_hints(dim, "bias", Init::Const(0.0))?;
        let running_mean = vb.get_with_hints(dim, "running_mean", Init::Const(0.0))?;
        let running_var = vb.get_with_hints(dim, "running_var", Init::Const(1.0))?;

        let scale = weight.div(&(running_var + eps)?.sqrt()?)?;
        let shift = (bias - running_mean.mul(&scale)?)?;
        Ok(Self { scale, shift })
    }
}

impl Module for ChannelNorm {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        xs.broadcast_mul(&self.scale)?.broadcast_add(&self.shift)
    }
}
