use candle_core::{Device, Tensor};
use candle_nn::{Init, Linear, Module, VarBuilder};

use crate::encoder::KeypointEncoder;
use crate::error::MatchError;
use crate::gnn::AttentionalGnn;
use crate::keypoints::{normalize_keypoints, ImageFeatures};
use crate::params::MatcherParams;
use crate::transport::log_optimal_transport;

/// Per-call matching options.
#[derive(Debug, Clone, Copy)]
pub struct MatchConfig {
    /// Minimum confidence for a mutual match to be accepted.
    pub match_threshold: f32,
    /// Number of Sinkhorn row/column passes.
    pub sinkhorn_iterations: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.2,
            sinkhorn_iterations: 100,
        }
    }
}

impl MatchConfig {
    /// Reject out-of-range values at the call boundary.
    pub fn validate(&self) -> Result<(), MatchError> {
        if self.sinkhorn_iterations == 0 {
            return Err(MatchError::InvalidConfig(
                "sinkhorn_iterations must be at least 1".to_string(),
            ));
        }
        if !self.match_threshold.is_finite() || !(0.0..=1.0).contains(&self.match_threshold) {
            return Err(MatchError::InvalidConfig(format!(
                "match_threshold must lie in [0, 1], got {}",
                self.match_threshold
            )));
        }
        Ok(())
    }
}

/// Matches for one image pair.
///
/// Each keypoint carries at most one match; the two directions always
/// agree (if `matches0[i] == Some(j)` then `matches1[j] == Some(i)`).
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// For each keypoint in image 0, the matched index in image 1.
    pub matches0: Vec<Option<usize>>,
    /// Confidence per entry of `matches0`, zero when unmatched.
    pub scores0: Vec<f32>,
    /// For each keypoint in image 1, the matched index in image 0.
    pub matches1: Vec<Option<usize>>,
    /// Confidence per entry of `matches1`, zero when unmatched.
    pub scores1: Vec<f32>,
}

impl MatchResult {
    fn unmatched(n0: usize, n1: usize) -> Self {
        Self {
            matches0: vec![None; n0],
            scores0: vec![0.0; n0],
            matches1: vec![None; n1],
            scores1: vec![0.0; n1],
        }
    }

    /// Number of accepted pairs.
    pub fn num_matches(&self) -> usize {
        self.matches0.iter().flatten().count()
    }

    /// Accepted `(i, j, confidence)` pairs in image-0 index order.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        self.matches0
            .iter()
            .zip(self.scores0.iter())
            .enumerate()
            .filter_map(|(i, (&j, &s))| j.map(|j| (i, j, s)))
    }
}

/// Discrete mutual matches from the inner block of a log-assignment.
///
/// `log_assignment` is the row-major `N0 x N1` real block (dustbin already
/// stripped); values are log probabilities. A pair is kept when row and
/// column maxima pick each other and `exp` of the value clears `threshold`.
/// Ties resolve to the first occurrence in index order, keeping the output
/// deterministic.
pub(crate) fn extract_matches(
    log_assignment: &[Vec<f32>],
    threshold: f32,
) -> Result<MatchResult, MatchError> {
    let n0 = log_assignment.len();
    let n1 = log_assignment.first().map_or(0, Vec::len);
    if n0 == 0 || n1 == 0 {
        return Ok(MatchResult::unmatched(n0, n1));
    }

    let mut best0 = vec![0usize; n0];
    let mut best0_val = vec![f32::NEG_INFINITY; n0];
    let mut best1 = vec![0usize; n1];
    let mut best1_val = vec![f32::NEG_INFINITY; n1];
    for (i, row) in log_assignment.iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            if !v.is_finite() {
                return Err(MatchError::NonFiniteAssignment);
            }
            if v > best0_val[i] {
                best0_val[i] = v;
                best0[i] = j;
            }
            if v > best1_val[j] {
                best1_val[j] = v;
                best1[j] = i;
            }
        }
    }

    let mut result = MatchResult::unmatched(n0, n1);
    for (i, &j) in best0.iter().enumerate() {
        if best1[j] != i {
            continue;
        }
        let confidence = best0_val[i].exp().min(1.0);
        if confidence > threshold {
            result.matches0[i] = Some(j);
            result.scores0[i] = confidence;
            result.matches1[j] = Some(i);
            result.scores1[j] = confidence;
        }
    }
    Ok(result)
}

/// Keypoint matcher with fixed trained weights.
///
/// Holds the keypoint encoder, the attentional graph network, the final
/// projection and the dustbin score. Construction loads all weights once;
/// afterwards the matcher is read-only and can serve concurrent
/// [`match_pair`](Matcher::match_pair) calls.
pub struct Matcher {
    kenc: KeypointEncoder,
    gnn: AttentionalGnn,
    final_proj: Linear,
    bin_score: Tensor,
    params: MatcherParams,
    device: Device,
}

impl Matcher {
    /// Build a matcher from hyperparameters and a weight bundle backend.
    pub fn new(params: MatcherParams, vb: VarBuilder) -> Result<Self, MatchError> {
        params.validate()?;
        let device = vb.device().clone();
        let kenc = KeypointEncoder::new(
            params.descriptor_dim,
            &params.keypoint_encoder,
            vb.pp("kenc"),
        )?;
        let gnn = AttentionalGnn::new(
            params.descriptor_dim,
            params.num_heads,
            params.gnn_layers,
            vb.pp("gnn"),
        )?;
        let final_proj = candle_nn::linear(
            params.descriptor_dim,
            params.descriptor_dim,
            vb.pp("final_proj"),
        )?;
        let bin_score = vb.get_with_hints(1, "bin_score", Init::Const(1.0))?;
        Ok(Self {
            kenc,
            gnn,
            final_proj,
            bin_score,
            params,
            device,
        })
    }

    /// Hyperparameters the loaded weights were trained with.
    pub fn params(&self) -> &MatcherParams {
        &self.params
    }

    /// Match two keypoint sets.
    ///
    /// Runs the full pipeline: coordinate normalization, positional
    /// encoding, attentional refinement, projection, affinity scoring,
    /// optimal transport and mutual-consistency extraction. A pair with an
    /// empty side short-circuits to an all-unmatched result; invalid inputs
    /// and configurations fail fast without partial output.
    pub fn match_pair(
        &self,
        feats0: &ImageFeatures,
        feats1: &ImageFeatures,
        config: &MatchConfig,
    ) -> Result<MatchResult, MatchError> {
        config.validate()?;
        let dim = self.params.descriptor_dim;
        feats0.validate(dim)?;
        feats1.validate(dim)?;

        let (n0, n1) = (feats0.len(), feats1.len());
        if n0 == 0 || n1 == 0 {
            log::debug!("degenerate pair ({n0} x {n1} keypoints), nothing to match");
            return Ok(MatchResult::unmatched(n0, n1));
        }

        let desc0 = self.encode(feats0)?;
        let desc1 = self.encode(feats1)?;
        let (desc0, desc1) = self.gnn.forward(&desc0, &desc1)?;
        let m0 = self.final_proj.forward(&desc0)?;
        let m1 = self.final_proj.forward(&desc1)?;

        let scores = (m0.matmul(&m1.t()?)? / (dim as f64).sqrt())?;
        let z = log_optimal_transport(&scores, &self.bin_score, config.sinkhorn_iterations)?;

        let inner = z
            .narrow(0, 0, n0)?
            .narrow(1, 0, n1)?
            .contiguous()?
            .to_vec2::<f32>()?;
        let result = extract_matches(&inner, config.match_threshold)?;
        log::debug!(
            "accepted {} matches between {n0} and {n1} keypoints",
            result.num_matches()
        );
        Ok(result)
    }

    /// Visual descriptors plus positional encoding for one image.
    fn encode(&self, feats: &ImageFeatures) -> Result<Tensor, MatchError> {
        let n = feats.len();
        let normalized = normalize_keypoints(&feats.keypoints, &feats.shape)?;
        let flat: Vec<f32> = normalized.iter().flatten().copied().collect();
        let kpts = Tensor::from_vec(flat, (n, 2), &self.device)?;
        let scores = Tensor::from_slice(&feats.scores, n, &self.device)?;
        let desc = Tensor::from_slice(
            &feats.descriptors,
            (n, self.params.descriptor_dim),
            &self.device,
        )?;
        Ok((desc + self.kenc.forward(&kpts, &scores)?)?)
    }
}
