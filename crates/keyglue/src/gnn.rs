use candle_core::{Result, Tensor};
use candle_nn::{Module, VarBuilder};
use keyglue_nn::{MultiHeadAttention, PointMlp};

/// Which keypoint set a layer attends over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionMode {
    /// Each image attends over its own keypoints.
    SelfAttn,
    /// Each image attends over the other image's keypoints.
    CrossAttn,
}

/// One message-passing layer of the graph network.
///
/// Computes an attention message for every keypoint and applies the residual
/// update `desc + mlp(concat[desc, message])` to both images.
pub struct AttentionalLayer {
    attn: MultiHeadAttention,
    update: PointMlp,
    mode: AttentionMode,
}

impl AttentionalLayer {
    /// Build one layer for `dim`-channel descriptors.
    pub fn new(dim: usize, num_heads: usize, mode: AttentionMode, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            attn: MultiHeadAttention::new(dim, num_heads, vb.pp("attn"))?,
            update: PointMlp::new(&[2 * dim, 2 * dim, dim], vb.pp("update"))?,
            mode,
        })
    }

    fn propagate(&self, xs: &Tensor, source: &Tensor) -> Result<Tensor> {
        let message = self.attn.forward(xs, source)?;
        self.update.forward(&Tensor::cat(&[xs, &message], 1)?)
    }

    /// Refine both descriptor sets by one round of message passing.
    pub fn forward(&self, desc0: &Tensor, desc1: &Tensor) -> Result<(Tensor, Tensor)> {
        let (source0, source1) = match self.mode {
            AttentionMode::SelfAttn => (desc0, desc1),
            AttentionMode::CrossAttn => (desc1, desc0),
        };
        let delta0 = self.propagate(desc0, source0)?;
        let delta1 = self.propagate(desc1, source1)?;
        Ok(((desc0 + delta0)?, (desc1 + delta1)?))
    }
}

/// Stack of alternating self/cross attention layers.
///
/// The schedule is fixed: layer `2k` is self-attention, layer `2k + 1` is
/// cross-attention. Descriptor dimensionality is preserved end to end and
/// the two sets may have different sizes.
pub struct AttentionalGnn {
    layers: Vec<AttentionalLayer>,
}

impl AttentionalGnn {
    /// Build `num_pairs` (self, cross) layer pairs.
    pub fn new(dim: usize, num_heads: usize, num_pairs: usize, vb: VarBuilder) -> Result<Self> {
        let mut layers = Vec::with_capacity(num_pairs * 2);
        for l in 0..num_pairs * 2 {
            let mode = if l % 2 == 0 {
                AttentionMode::SelfAttn
            } else {
                AttentionMode::CrossAttn
            };
            layers.push(AttentionalLayer::new(
                dim,
                num_heads,
                mode,
                vb.pp(format!("layers.{l}")),
            )?);
        }
        Ok(Self { layers })
    }

    /// Run all layers over both descriptor sets.
    pub fn forward(&self, desc0: &Tensor, desc1: &Tensor) -> Result<(Tensor, Tensor)> {
        let mut desc0 = desc0.clone();
        let mut desc1 = desc1.clone();
        for layer in &self.layers {
            (desc0, desc1) = layer.forward(&desc0, &desc1)?;
        }
        Ok((desc0, desc1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    fn random_gnn(dim: usize, pairs: usize, device: &Device) -> Result<AttentionalGnn> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        AttentionalGnn::new(dim, 2, pairs, vb)
    }

    #[test]
    fn test_shapes_preserved_with_unequal_sets() -> Result<()> {
        let device = Device::Cpu;
        let gnn = random_gnn(8, 2, &device)?;

        let desc0 = Tensor::randn(0.0f32, 1.0, (5, 8), &device)?;
        let desc1 = Tensor::randn(0.0f32, 1.0, (3, 8), &device)?;
        let (out0, out1) = gnn.forward(&desc0, &desc1)?;

        assert_eq!(out0.dims2()?, (5, 8));
        assert_eq!(out1.dims2()?, (3, 8));
        Ok(())
    }

    #[test]
    fn test_single_keypoint_does_not_fail() -> Result<()> {
        let device = Device::Cpu;
        let gnn = random_gnn(8, 1, &device)?;

        let desc0 = Tensor::randn(0.0f32, 1.0, (1, 8), &device)?;
        let desc1 = Tensor::randn(0.0f32, 1.0, (4, 8), &device)?;
        let (out0, _) = gnn.forward(&desc0, &desc1)?;

        for v in out0.flatten_all()?.to_vec1::<f32>()? {
            assert!(v.is_finite());
        }
        Ok(())
    }

    #[test]
    fn test_permutation_equivariance() -> Result<()> {
        let device = Device::Cpu;
        let gnn = random_gnn(8, 2, &device)?;

        let desc0 = Tensor::randn(0.0f32, 1.0, (4, 8), &device)?;
        let desc1 = Tensor::randn(0.0f32, 1.0, (3, 8), &device)?;
        let perm = Tensor::new(&[2u32, 0, 3, 1], &device)?;

        let (out, _) = gnn.forward(&desc0, &desc1)?;
        let (out_perm, _) = gnn.forward(&desc0.index_select(&perm, 0)?, &desc1)?;

        let expected = out.index_select(&perm, 0)?.to_vec2::<f32>()?;
        let actual = out_perm.to_vec2::<f32>()?;
        for (row_a, row_b) in expected.iter().zip(actual.iter()) {
            for (a, b) in row_a.iter().zip(row_b.iter()) {
                approx::assert_relative_eq!(*a, *b, epsilon = 1e-4, max_relative = 1e-4);
            }
        }
        Ok(())
    }
}
