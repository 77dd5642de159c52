use candle_core::{Result, Tensor};
use candle_nn::{ops::softmax_last_dim, Linear, Module, VarBuilder};

/// Multi-head scaled dot-product attention over two keypoint sets.
///
/// Queries come from one `(N_q, D)` descriptor set and keys/values from a
/// possibly different `(N_s, D)` set, which makes the same module usable for
/// both self- and cross-attention. Output shape equals the query shape.
#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    merge: Linear,
    num_heads: usize,
    head_dim: usize,
}

impl MultiHeadAttention {
    /// Load the four projections (`query`, `key`, `value`, `merge`) for
    /// `dim` channels split over `num_heads` heads.
    pub fn new(dim: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        if num_heads == 0 || dim % num_heads != 0 {
            candle_core::bail!("attention dim {dim} is not divisible into {num_heads} heads");
        }
        Ok(Self {
            query: candle_nn::linear(dim, dim, vb.pp("query"))?,
            key: candle_nn::linear(dim, dim, vb.pp("key"))?,
            value: candle_nn::linear(dim, dim, vb.pp("value"))?,
            merge: candle_nn::linear(dim, dim, vb.pp("merge"))?,
            num_heads,
            head_dim: dim / num_heads,
        })
    }

    fn split_heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (n, _) = xs.dims2()?;
        xs.reshape((n, self.num_heads, self.head_dim))?
            .transpose(0, 1)?
            .contiguous()
    }

    /// Attend from `xs` over `source` and return one message per query.
    ///
    /// `source` must be non-empty; softmax over an empty key set is
    /// undefined and callers are expected to skip the call instead.
    pub fn forward(&self, xs: &Tensor, source: &Tensor) -> Result<Tensor> {
        let (n_q, dim) = xs.dims2()?;

        let q = self.split_heads(&self.query.forward(xs)?)?;
        let k = self.split_heads(&self.key.forward(source)?)?;
        let v = self.split_heads(&self.value.forward(source)?)?;

        // (heads, n_q, n_s)
        let att = (q.matmul(&k.t()?)? / (self.head_dim as f64).sqrt())?;
        let att = softmax_last_dim(&att)?;

        let message = att
            .matmul(&v)?
            .transpose(0, 1)?
            .contiguous()?
            .reshape((n_q, dim))?;
        self.merge.forward(&message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use std::collections::HashMap;

    fn projection_fixture(device: &Device, zero_key: bool) -> Result<VarBuilder<'static>> {
        let mut ts = HashMap::new();
        for name in ["query", "key", "value", "merge"] {
            let weight = if zero_key && name == "key" {
                Tensor::zeros((2, 2), DType::F32, device)?
            } else {
                Tensor::eye(2, DType::F32, device)?
            };
            ts.insert(format!("{name}.weight"), weight);
            ts.insert(format!("{name}.bias"), Tensor::zeros(2, DType::F32, device)?);
        }
        Ok(VarBuilder::from_tensors(ts, DType::F32, device))
    }

    #[test]
    fn test_single_source_returns_its_value() -> Result<()> {
        let device = Device::Cpu;
        let attn = MultiHeadAttention::new(2, 1, projection_fixture(&device, false)?)?;

        // one key/value: softmax weight is 1 regardless of the query
        let x = Tensor::new(&[[5.0f32, -1.0]], &device)?;
        let source = Tensor::new(&[[1.0f32, 2.0]], &device)?;
        let y = attn.forward(&x, &source)?;

        assert_eq!(y.to_vec2::<f32>()?, vec![vec![1.0f32, 2.0]]);
        Ok(())
    }

    #[test]
    fn test_uniform_attention_averages_values() -> Result<()> {
        let device = Device::Cpu;
        let attn = MultiHeadAttention::new(2, 1, projection_fixture(&device, true)?)?;

        // zero keys make every score equal, so the message is the mean value
        let x = Tensor::new(&[[1.0f32, 0.0], [0.0, 1.0]], &device)?;
        let source = Tensor::new(&[[2.0f32, 0.0], [0.0, 2.0]], &device)?;
        let y = attn.forward(&x, &source)?.to_vec2::<f32>()?;

        for row in y {
            for v in row {
                approx::assert_relative_eq!(v, 1.0f32, epsilon = 1e-5);
            }
        }
        Ok(())
    }

    #[test]
    fn test_rejects_indivisible_heads() {
        let device = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &device);
        assert!(MultiHeadAttention::new(6, 4, vb).is_err());
    }

    #[test]
    fn test_cross_shape_mismatch_is_supported() -> Result<()> {
        let device = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &device);
        let attn = MultiHeadAttention::new(4, 2, vb)?;

        let x = Tensor::zeros((3, 4), DType::F32, &device)?;
        let source = Tensor::zeros((7, 4), DType::F32, &device)?;
        let y = attn.forward(&x, &source)?;

        assert_eq!(y.dims2()?, (3, 4));
        Ok(())
    }
}
