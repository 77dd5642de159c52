use candle_core::{DType, Result, Tensor};

/// Numerically stable `log(sum(exp(x)))` along `dim`, removing that dim.
///
/// The running maximum is subtracted before exponentiating so that large
/// affinities cannot overflow; `-inf` entries (zero mass) are handled
/// naturally by `exp` underflowing to zero.
fn log_sum_exp(xs: &Tensor, dim: usize) -> Result<Tensor> {
    let max = xs.max_keepdim(dim)?;
    let sum = xs.broadcast_sub(&max)?.exp()?.sum_keepdim(dim)?;
    (sum.log()? + max)?.squeeze(dim)
}

/// One row pass: rescale so every row hits its target log-marginal.
fn row_update(couplings: &Tensor, v: &Tensor, log_mu: &Tensor) -> Result<Tensor> {
    let lse = log_sum_exp(&couplings.broadcast_add(&v.unsqueeze(0)?)?, 1)?;
    log_mu - lse
}

/// One column pass: rescale so every column hits its target log-marginal.
fn col_update(couplings: &Tensor, u: &Tensor, log_nu: &Tensor) -> Result<Tensor> {
    let lse = log_sum_exp(&couplings.broadcast_add(&u.unsqueeze(1)?)?, 0)?;
    log_nu - lse
}

/// Solve a soft partial assignment in log space (Sinkhorn with a dustbin).
///
/// The `(N0, N1)` affinity matrix is augmented with one dustbin row and
/// column filled with the learned `bin_score` scalar, then iteratively
/// rescaled so the exponentiated result approaches the marginals
/// `[1, .., 1, N1]` over rows and `[1, .., 1, N0]` over columns (total mass
/// `N0 + N1` on both sides). Iteration happens with `1/(N0+N1)`-normalized
/// marginals; the `ln(N0 + N1)` offset is added back before returning, so
/// `exp` of the result satisfies the un-normalized marginals directly.
///
/// Returns the `(N0 + 1, N1 + 1)` log-assignment. Either side (but not
/// both) may be empty, in which case all mass ends up in the dustbin of the
/// non-empty side. Deterministic for a fixed iteration count.
pub fn log_optimal_transport(
    scores: &Tensor,
    bin_score: &Tensor,
    iterations: usize,
) -> Result<Tensor> {
    let (m, n) = scores.dims2()?;
    if m == 0 && n == 0 {
        candle_core::bail!("cannot transport between two empty keypoint sets");
    }
    let device = scores.device();

    let corner = bin_score.reshape((1, 1))?;
    let couplings = if m == 0 {
        // only the dustbin row survives
        Tensor::cat(&[&bin_score.expand((1, n))?, &corner], 1)?
    } else if n == 0 {
        Tensor::cat(&[&bin_score.expand((m, 1))?, &corner], 0)?
    } else {
        let top = Tensor::cat(&[scores, &bin_score.expand((m, 1))?], 1)?;
        let bottom = Tensor::cat(&[&bin_score.expand((1, n))?, &corner], 1)?;
        Tensor::cat(&[&top, &bottom], 0)?
    };

    let norm = -((m + n) as f32).ln();
    let mut log_mu = vec![norm; m + 1];
    log_mu[m] = (n as f32).ln() + norm;
    let mut log_nu = vec![norm; n + 1];
    log_nu[n] = (m as f32).ln() + norm;
    let log_mu = Tensor::from_vec(log_mu, m + 1, device)?;
    let log_nu = Tensor::from_vec(log_nu, n + 1, device)?;

    let mut u = Tensor::zeros(m + 1, DType::F32, device)?;
    let mut v = Tensor::zeros(n + 1, DType::F32, device)?;
    for _ in 0..iterations {
        u = row_update(&couplings, &v, &log_mu)?;
        v = col_update(&couplings, &u, &log_nu)?;
    }
    log::debug!("sinkhorn finished after {iterations} iterations on a {m}x{n} problem");

    let assignment = couplings
        .broadcast_add(&u.unsqueeze(1)?)?
        .broadcast_add(&v.unsqueeze(0)?)?;
    assignment - norm as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn marginals(z: &Tensor) -> Result<(Vec<f32>, Vec<f32>)> {
        let p = z.exp()?;
        Ok((p.sum(1)?.to_vec1::<f32>()?, p.sum(0)?.to_vec1::<f32>()?))
    }

    #[test]
    fn test_marginals_converge() -> Result<()> {
        let device = Device::Cpu;
        let (m, n) = (7, 5);
        let scores = Tensor::rand(0.0f32, 1.0, (m, n), &device)?;
        let bin_score = Tensor::new(&[0.5f32], &device)?;

        let z = log_optimal_transport(&scores, &bin_score, 100)?;
        assert_eq!(z.dims2()?, (m + 1, n + 1));

        let (rows, cols) = marginals(&z)?;
        for &r in &rows[..m] {
            assert!((r - 1.0).abs() < 1e-3, "row sum {r}");
        }
        assert!((rows[m] - n as f32).abs() < 1e-3, "dustbin row {}", rows[m]);
        for &c in &cols[..n] {
            assert!((c - 1.0).abs() < 1e-3, "col sum {c}");
        }
        assert!((cols[n] - m as f32).abs() < 1e-3, "dustbin col {}", cols[n]);
        Ok(())
    }

    #[test]
    fn test_peaked_diagonal_concentrates_mass() -> Result<()> {
        let device = Device::Cpu;
        let scores = (Tensor::eye(3, DType::F32, &device)? * 10.0)?;
        let bin_score = Tensor::new(&[0.0f32], &device)?;

        let z = log_optimal_transport(&scores, &bin_score, 100)?;
        let p = z.exp()?.to_vec2::<f32>()?;
        for i in 0..3 {
            assert!(p[i][i] > 0.9, "diagonal mass {}", p[i][i]);
            for j in 0..3 {
                if i != j {
                    assert!(p[i][j] < 0.05, "off-diagonal mass {}", p[i][j]);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_empty_side_moves_all_mass_to_dustbin() -> Result<()> {
        let device = Device::Cpu;
        let scores = Tensor::from_vec(Vec::<f32>::new(), (0, 3), &device)?;
        let bin_score = Tensor::new(&[0.25f32], &device)?;

        let z = log_optimal_transport(&scores, &bin_score, 50)?;
        assert_eq!(z.dims2()?, (1, 4));

        let (rows, cols) = marginals(&z)?;
        assert!((rows[0] - 3.0).abs() < 1e-3);
        for &c in &cols[..3] {
            assert!((c - 1.0).abs() < 1e-3);
        }
        // no real keypoints on the other side, so the corner carries nothing
        assert!(cols[3].abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn test_both_sides_empty_is_an_error() {
        let device = Device::Cpu;
        let scores = Tensor::from_vec(Vec::<f32>::new(), (0, 0), &device).unwrap();
        let bin_score = Tensor::new(&[0.0f32], &device).unwrap();
        assert!(log_optimal_transport(&scores, &bin_score, 10).is_err());
    }

    #[test]
    fn test_deterministic_across_calls() -> Result<()> {
        let device = Device::Cpu;
        let scores = Tensor::rand(0.0f32, 1.0, (4, 6), &device)?;
        let bin_score = Tensor::new(&[1.0f32], &device)?;

        let a = log_optimal_transport(&scores, &bin_score, 30)?.to_vec2::<f32>()?;
        let b = log_optimal_transport(&scores, &bin_score, 30)?.to_vec2::<f32>()?;
        assert_eq!(a, b);
        Ok(())
    }
}
